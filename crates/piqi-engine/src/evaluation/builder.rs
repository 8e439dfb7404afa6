use std::collections::BTreeMap;
use std::sync::Arc;

use crate::message::{MessageModelItem, MessageTree};
use crate::refdata::{Entity, ReferenceDataIndex};

use super::item::{EvaluationGraph, EvaluationItem, ItemHandle, ItemType};

/// Zip the entity model with the message tree into the evaluation graph.
///
/// Classes are visited in entity-name order and attributes in name order
/// so two evaluations of the same message produce identical trees.
/// Element items are only created for element instances actually present
/// in the message; attribute items are created unconditionally so
/// attribute-presence SAMs can fire on absence.
pub(crate) fn build_graph(index: &ReferenceDataIndex, tree: &MessageTree) -> EvaluationGraph {
    let root_entity = index.root_entity();
    let root_message = tree.root_item();

    let mut graph = EvaluationGraph::new(EvaluationItem {
        key: root_message.key.clone(),
        entity: root_entity.clone(),
        item_type: ItemType::Root,
        root_mnemonic: root_entity.mnemonic.clone(),
        class_mnemonic: None,
        class_name: None,
        element_mnemonic: None,
        element_sequence: None,
        message_text: Some(root_message.message_text.clone()),
        parent: None,
        children: Vec::new(),
        criteria_results: BTreeMap::new(),
        full_results: BTreeMap::new(),
    });
    let root_handle = graph.root();

    let mut classes: Vec<&Entity> = root_entity.class_children().collect();
    classes.sort_by(|a, b| a.name.cmp(&b.name));

    for class in classes {
        let class_entity = index
            .entity(&class.mnemonic)
            .cloned()
            .unwrap_or_else(|| Arc::new(class.clone()));
        let class_message = root_message.single_child(&class.mnemonic);
        let class_key = class_message
            .map(|item| item.key.clone())
            .unwrap_or_else(|| format!("{}.{}", root_message.key, class.mnemonic));

        let class_handle = graph.push_child(
            root_handle,
            EvaluationItem {
                key: class_key,
                entity: class_entity.clone(),
                item_type: ItemType::Class,
                root_mnemonic: root_entity.mnemonic.clone(),
                class_mnemonic: Some(class.mnemonic.clone()),
                class_name: Some(class.name.clone()),
                element_mnemonic: None,
                element_sequence: None,
                message_text: class_message.map(|item| item.message_text.clone()),
                parent: None,
                children: Vec::new(),
                criteria_results: BTreeMap::new(),
                full_results: BTreeMap::new(),
            },
        );

        let Some(class_message) = class_message else {
            continue;
        };
        let Some(template) = class.element_template() else {
            continue;
        };
        let template_entity = index
            .entity(&template.mnemonic)
            .cloned()
            .unwrap_or_else(|| Arc::new(template.clone()));

        for instance in class_message.instances(&template.mnemonic) {
            let element_handle = graph.push_child(
                class_handle,
                EvaluationItem {
                    key: instance.key.clone(),
                    entity: template_entity.clone(),
                    item_type: ItemType::Element,
                    root_mnemonic: root_entity.mnemonic.clone(),
                    class_mnemonic: Some(class.mnemonic.clone()),
                    class_name: Some(class.name.clone()),
                    element_mnemonic: Some(template.mnemonic.clone()),
                    element_sequence: instance.element_sequence,
                    message_text: Some(instance.message_text.clone()),
                    parent: None,
                    children: Vec::new(),
                    criteria_results: BTreeMap::new(),
                    full_results: BTreeMap::new(),
                },
            );

            let mut attributes: Vec<&Entity> = template.attribute_children().collect();
            attributes.sort_by(|a, b| a.name.cmp(&b.name));

            for attribute in attributes {
                let attribute_entity = index
                    .entity(&attribute.mnemonic)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(attribute.clone()));
                let attribute_message: Option<&MessageModelItem> =
                    instance.single_child(&attribute.mnemonic);
                let attribute_key = attribute_message
                    .map(|item| item.key.clone())
                    .unwrap_or_else(|| format!("{}.{}", instance.key, attribute.mnemonic));

                graph.push_child(
                    element_handle,
                    EvaluationItem {
                        key: attribute_key,
                        entity: attribute_entity,
                        item_type: ItemType::Attribute,
                        root_mnemonic: root_entity.mnemonic.clone(),
                        class_mnemonic: Some(class.mnemonic.clone()),
                        class_name: Some(class.name.clone()),
                        element_mnemonic: Some(template.mnemonic.clone()),
                        element_sequence: instance.element_sequence,
                        message_text: attribute_message.map(|item| item.message_text.clone()),
                        parent: None,
                        children: Vec::new(),
                        criteria_results: BTreeMap::new(),
                        full_results: BTreeMap::new(),
                    },
                );
            }
        }
    }

    graph
}
