//! Message envelope and the parsed message tree.
//!
//! The incoming payload is parsed against the entity model into a tree of
//! [`MessageModelItem`]. Every node keeps its raw JSON sub-document so
//! SAMs can consult fields the model does not surface. The tree lives for
//! exactly one evaluation request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::refdata::ReferenceDataIndex;

/// Header fields carried into the scorecard verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(rename = "DataProviderID")]
    pub data_provider_id: String,
    #[serde(rename = "DataSourceID")]
    pub data_source_id: String,
    #[serde(rename = "MessageID")]
    pub message_id: String,
}

/// One patient message as accepted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientMessage {
    #[serde(rename = "Header")]
    pub header: MessageHeader,
    #[serde(rename = "Message")]
    pub body: Value,
}

/// Error raised while parsing a message. Fatal to the request.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid message: root '{found}' does not match reference data root '{expected}'")]
    RootMismatch { expected: String, found: String },
    #[error("invalid message: {0}")]
    Unparseable(String),
}

/// Child edge of a message node: attribute children resolve to a single
/// item, class→element edges to an ordered instance list.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageChild {
    Single(MessageModelItem),
    Instances(Vec<MessageModelItem>),
}

/// A node in the concrete message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageModelItem {
    pub key: String,
    pub mnemonic: String,
    pub element_sequence: Option<u32>,
    /// The literal JSON sub-document backing this node.
    pub message_text: Value,
    pub children: BTreeMap<String, MessageChild>,
}

impl MessageModelItem {
    fn new(key: String, mnemonic: String, message_text: Value) -> Self {
        Self {
            key,
            mnemonic,
            element_sequence: None,
            message_text,
            children: BTreeMap::new(),
        }
    }

    pub fn child(&self, mnemonic: &str) -> Option<&MessageChild> {
        self.children.get(mnemonic)
    }

    pub fn single_child(&self, mnemonic: &str) -> Option<&MessageModelItem> {
        match self.children.get(mnemonic) {
            Some(MessageChild::Single(item)) => Some(item),
            _ => None,
        }
    }

    pub fn instances(&self, mnemonic: &str) -> &[MessageModelItem] {
        match self.children.get(mnemonic) {
            Some(MessageChild::Instances(items)) => items,
            _ => &[],
        }
    }
}

/// The parsed message tree for one evaluation request.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTree {
    root: MessageModelItem,
}

impl MessageTree {
    /// Parse a message body against the entity model.
    ///
    /// The body must be an object with a single field matching the
    /// reference-data root (by mnemonic or field name); anything else is
    /// an invalid message.
    pub fn build(
        index: &ReferenceDataIndex,
        message: &PatientMessage,
    ) -> Result<Self, MessageError> {
        let root_entity = index.root_entity();
        let body = message
            .body
            .as_object()
            .ok_or_else(|| MessageError::Unparseable("message body is not an object".into()))?;

        let (found_key, root_value) = body.iter().next().ok_or_else(|| {
            MessageError::Unparseable("message body carries no root object".into())
        })?;
        if found_key != &root_entity.mnemonic && found_key != &root_entity.field_name {
            return Err(MessageError::RootMismatch {
                expected: root_entity.mnemonic.clone(),
                found: found_key.clone(),
            });
        }

        let mut root = MessageModelItem::new(
            root_entity.mnemonic.clone(),
            root_entity.mnemonic.clone(),
            root_value.clone(),
        );

        let root_object = root_value.as_object();
        for class in root_entity.class_children() {
            let Some(class_value) =
                root_object.and_then(|object| object.get(class.field_name.as_str()))
            else {
                continue;
            };
            let class_key = format!("{}.{}", root.key, class.mnemonic);
            let mut class_item = MessageModelItem::new(
                class_key.clone(),
                class.mnemonic.clone(),
                class_value.clone(),
            );

            if let Some(template) = class.element_template() {
                let raw_instances: Vec<&Value> = match class_value {
                    Value::Array(values) => values.iter().collect(),
                    Value::Null => Vec::new(),
                    other => vec![other],
                };

                let mut instances = Vec::with_capacity(raw_instances.len());
                for (position, raw) in raw_instances.iter().enumerate() {
                    let sequence = position as u32 + 1;
                    let element_key = format!("{}.{}.{}", class_key, template.mnemonic, sequence);
                    let mut element = MessageModelItem::new(
                        element_key.clone(),
                        template.mnemonic.clone(),
                        (*raw).clone(),
                    );
                    element.element_sequence = Some(sequence);

                    if let Some(fields) = raw.as_object() {
                        for attribute in template.attribute_children() {
                            if let Some(value) = fields.get(attribute.field_name.as_str()) {
                                let attribute_key =
                                    format!("{}.{}", element_key, attribute.mnemonic);
                                element.children.insert(
                                    attribute.mnemonic.clone(),
                                    MessageChild::Single(MessageModelItem::new(
                                        attribute_key,
                                        attribute.mnemonic.clone(),
                                        value.clone(),
                                    )),
                                );
                            }
                        }
                    }
                    instances.push(element);
                }
                class_item
                    .children
                    .insert(template.mnemonic.clone(), MessageChild::Instances(instances));
            }

            root.children
                .insert(class.mnemonic.clone(), MessageChild::Single(class_item));
        }

        Ok(Self { root })
    }

    pub fn root_item(&self) -> &MessageModelItem {
        &self.root
    }

    pub fn by_key(&self, key: &str) -> Option<&MessageModelItem> {
        find_by_key(&self.root, key)
    }
}

fn find_by_key<'a>(item: &'a MessageModelItem, key: &str) -> Option<&'a MessageModelItem> {
    if item.key == key {
        return Some(item);
    }
    for child in item.children.values() {
        let found = match child {
            MessageChild::Single(child) => find_by_key(child, key),
            MessageChild::Instances(children) => {
                children.iter().find_map(|child| find_by_key(child, key))
            }
        };
        if found.is_some() {
            return found;
        }
    }
    None
}
