//! Parsing of input messages into dynamic protobuf messages.

use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, ReflectMessage, Value};

use super::ConversionError;
use crate::config::{MessageMode, StorageSinkConfig};
use crate::error::{Error, Result};
use crate::message::InputMessage;

/// Turns an input message into a typed field mapping.
pub trait MessageParser: Send + Sync {
    fn parse(&self, message: &InputMessage) -> std::result::Result<DynamicMessage, ConversionError>;
}

/// Decodes the key or value of the input message with a protobuf descriptor.
#[derive(Debug, Clone)]
pub struct ProtoMessageParser {
    descriptor: MessageDescriptor,
    mode: MessageMode,
    allow_unknown_fields: bool,
}

impl ProtoMessageParser {
    pub fn new(descriptor: MessageDescriptor, mode: MessageMode, allow_unknown_fields: bool) -> Self {
        Self {
            descriptor,
            mode,
            allow_unknown_fields,
        }
    }

    /// Resolves the configured message class in `pool`.
    pub fn from_pool(pool: &DescriptorPool, config: &StorageSinkConfig) -> Result<Self> {
        let descriptor = pool.get_message_by_name(&config.message_class).ok_or_else(|| {
            Error::Config(format!(
                "message {} not found in descriptor pool",
                config.message_class
            ))
        })?;
        Ok(Self::new(
            descriptor,
            config.message_mode,
            config.allow_unknown_fields,
        ))
    }
}

impl MessageParser for ProtoMessageParser {
    fn parse(&self, message: &InputMessage) -> std::result::Result<DynamicMessage, ConversionError> {
        let payload = match self.mode {
            MessageMode::LogMessage => &message.value,
            MessageMode::LogKey => &message.key,
        };
        if payload.is_empty() {
            return Err(ConversionError::EmptyMessage);
        }

        let parsed = DynamicMessage::decode(self.descriptor.clone(), payload.clone())?;
        if !self.allow_unknown_fields {
            let mut paths = Vec::new();
            collect_unknown_fields(&parsed, parsed.descriptor().full_name(), &mut paths);
            if !paths.is_empty() {
                return Err(ConversionError::UnknownFields {
                    message: self.descriptor.full_name().to_string(),
                    paths: paths.join(", "),
                });
            }
        }
        Ok(parsed)
    }
}

/// Pushes the path of every message, at any depth, that carries unknown fields.
fn collect_unknown_fields(message: &DynamicMessage, path: &str, paths: &mut Vec<String>) {
    if message.unknown_fields().next().is_some() {
        paths.push(path.to_string());
    }
    for (field, value) in message.fields() {
        let field_path = format!("{path}.{}", field.name());
        match value {
            Value::Message(nested) => collect_unknown_fields(nested, &field_path, paths),
            Value::List(items) => {
                for item in items {
                    if let Value::Message(nested) = item {
                        collect_unknown_fields(nested, &field_path, paths);
                    }
                }
            }
            Value::Map(entries) => {
                for value in entries.values() {
                    if let Value::Message(nested) = value {
                        collect_unknown_fields(nested, &field_path, paths);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, Bytes, BytesMut};
    use prost::Message;

    use super::*;
    use crate::converter::test_utils::{ORDER_MESSAGE, order_pool};

    /// Field 99, varint 1. Unknown to every test message.
    const UNKNOWN_FIELD: [u8; 3] = [0x98, 0x06, 0x01];

    fn parser(mode: MessageMode, allow_unknown_fields: bool) -> ProtoMessageParser {
        let pool = order_pool();
        ProtoMessageParser::new(
            pool.get_message_by_name(ORDER_MESSAGE).unwrap(),
            mode,
            allow_unknown_fields,
        )
    }

    fn order_bytes(id: &str) -> Bytes {
        let pool = order_pool();
        let mut order = DynamicMessage::new(pool.get_message_by_name(ORDER_MESSAGE).unwrap());
        order.set_field_by_name("id", Value::String(id.to_string()));
        Bytes::from(order.encode_to_vec())
    }

    #[test]
    fn test_parse_value_and_key() {
        let message = InputMessage::new(order_bytes("key-1"), order_bytes("value-1"));

        let parsed = parser(MessageMode::LogMessage, false).parse(&message).unwrap();
        assert_eq!(parsed.get_field_by_name("id").unwrap().as_str(), Some("value-1"));

        let parsed = parser(MessageMode::LogKey, false).parse(&message).unwrap();
        assert_eq!(parsed.get_field_by_name("id").unwrap().as_str(), Some("key-1"));
    }

    #[test]
    fn test_empty_payload() {
        let message = InputMessage::new(order_bytes("key-1"), Bytes::new());
        let err = parser(MessageMode::LogMessage, false)
            .parse(&message)
            .unwrap_err();
        assert!(matches!(err, ConversionError::EmptyMessage));
    }

    #[test]
    fn test_garbage_payload() {
        let message = InputMessage::new(Bytes::new(), Bytes::from_static(&[0xff, 0xff, 0xff]));
        let err = parser(MessageMode::LogMessage, false)
            .parse(&message)
            .unwrap_err();
        assert!(matches!(err, ConversionError::Decode(_)));
    }

    #[test]
    fn test_unknown_top_level_fields() {
        let mut value = BytesMut::from(order_bytes("o-1").as_ref());
        value.put_slice(&UNKNOWN_FIELD);
        let message = InputMessage::new(Bytes::new(), value.freeze());

        let err = parser(MessageMode::LogMessage, false)
            .parse(&message)
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnknownFields { .. }));

        assert!(parser(MessageMode::LogMessage, true).parse(&message).is_ok());
    }

    #[test]
    fn test_unknown_nested_fields() {
        let pool = order_pool();
        let mut customer = DynamicMessage::new(pool.get_message_by_name("test.Customer").unwrap());
        customer.set_field_by_name("name", Value::String("ada".to_string()));
        let mut customer_bytes = customer.encode_to_vec();
        customer_bytes.extend_from_slice(&UNKNOWN_FIELD);

        // field 8 (customer), length delimited
        let mut value = BytesMut::new();
        value.put_u8(0x42);
        value.put_u8(customer_bytes.len() as u8);
        value.put_slice(&customer_bytes);
        let message = InputMessage::new(Bytes::new(), value.freeze());

        let err = parser(MessageMode::LogMessage, false)
            .parse(&message)
            .unwrap_err();
        let ConversionError::UnknownFields { paths, .. } = err else {
            panic!("expected unknown fields error");
        };
        assert_eq!(paths, "test.Order.customer");
    }

    #[test]
    fn test_from_pool() {
        let pool = order_pool();
        let config = StorageSinkConfig::load([
            ("SINK_BIGQUERY_GOOGLE_CLOUD_PROJECT_ID", "proj"),
            ("SINK_BIGQUERY_DATASET_NAME", "ds"),
            ("SINK_BIGQUERY_TABLE_NAME", "orders"),
            ("SINK_CONNECTOR_SCHEMA_PROTO_MESSAGE_CLASS", ORDER_MESSAGE),
        ])
        .unwrap();
        assert!(ProtoMessageParser::from_pool(&pool, &config).is_ok());

        let config = StorageSinkConfig {
            message_class: "test.Missing".to_string(),
            ..config
        };
        assert!(matches!(
            ProtoMessageParser::from_pool(&pool, &config),
            Err(Error::Config(_))
        ));
    }
}
