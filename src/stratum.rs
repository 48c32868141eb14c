use super::*;

mod message;
mod server;

pub use message::{
    NotifyBody, StratumMessage, SubmitBody, SubscribeBody, SubscribedBody,
};
pub(crate) use server::{ClientInfo, StratumServer, Submission};
