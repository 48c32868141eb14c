use super::*;

/// One newline-delimited frame on the miner connection. Every message
/// carries an id; requests expect a response frame echoing theirs, server
/// pushes use ids from the server's own counter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StratumMessage {
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl StratumMessage {
    pub fn new(id: u64, method: &str, body: impl Serialize) -> Self {
        Self {
            id,
            method: method.into(),
            body: Some(json!(body)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    pub public_address: String,
    /// 32-byte tag stamped into every header this miner searches, hex.
    #[serde(default)]
    pub graffiti: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedBody {
    pub client_id: u64,
    /// The constant share target, hex.
    pub target: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    pub mining_request_id: u64,
    pub randomness: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyBody {
    pub mining_request_id: u64,
    pub header: BlockHeader,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn case(s: &str, expected: StratumMessage) {
        let actual = serde_json::from_str::<StratumMessage>(s).unwrap();
        assert_eq!(actual, expected, "deserialize StratumMessage");

        let round_trip =
            serde_json::from_str::<StratumMessage>(&serde_json::to_string(&actual).unwrap())
                .unwrap();
        assert_eq!(round_trip, expected, "round trip");
    }

    #[test]
    fn subscribe() {
        case(
            r#"{"id":1,"method":"mining.subscribe","body":{"publicAddress":"miner-a","graffiti":"00ff"}}"#,
            StratumMessage::new(
                1,
                "mining.subscribe",
                SubscribeBody {
                    public_address: "miner-a".into(),
                    graffiti: "00ff".into(),
                },
            ),
        );
    }

    #[test]
    fn subscribe_graffiti_defaults_to_empty() {
        let message = serde_json::from_str::<StratumMessage>(
            r#"{"id":1,"method":"mining.subscribe","body":{"publicAddress":"miner-a"}}"#,
        )
        .unwrap();

        let body =
            serde_json::from_value::<SubscribeBody>(message.body.unwrap()).unwrap();
        assert_eq!(body.graffiti, "");
    }

    #[test]
    fn submit() {
        case(
            r#"{"id":4,"method":"mining.submit","body":{"miningRequestId":7,"randomness":"00112233aabbccdd"}}"#,
            StratumMessage::new(
                4,
                "mining.submit",
                SubmitBody {
                    mining_request_id: 7,
                    randomness: "00112233aabbccdd".into(),
                },
            ),
        );
    }

    #[test]
    fn bodyless_messages_omit_the_field() {
        let message = StratumMessage {
            id: 9,
            method: "mining.wait_for_work".into(),
            body: None,
        };

        let json = serde_json::to_string(&message).unwrap();
        assert!(!json.contains("body"), "unexpected body field: {json}");

        assert_eq!(
            serde_json::from_str::<StratumMessage>(&json).unwrap(),
            message
        );
    }

    #[test]
    fn notify_embeds_the_header() {
        let header = BlockHeader {
            previous_block_hash: "aa".repeat(32),
            target: "ff".repeat(32),
            timestamp: 123,
            randomness: "00".repeat(8),
            graffiti: "00".repeat(32),
            extra: BTreeMap::new(),
        };

        let message = StratumMessage::new(
            2,
            "mining.notify",
            NotifyBody {
                mining_request_id: 0,
                header: header.clone(),
            },
        );

        let body = serde_json::from_value::<NotifyBody>(message.body.unwrap()).unwrap();
        assert_eq!(body.header, header);
        assert_eq!(body.mining_request_id, 0);
    }
}
