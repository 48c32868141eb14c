fn main() {
    cinder::main()
}
