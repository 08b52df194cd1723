use std::collections::HashMap;

use glam::{Quat, Vec3};

use crate::message::{EntityAddMessage, Message};
use crate::net::NetworkId;

/// Everything needed to create a networked entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpawn {
    pub entity_type: u8,
    pub owner: NetworkId,
    pub parent: NetworkId,
    pub position: Vec3,
    pub rotation: Quat,
}

impl EntitySpawn {
    pub fn new(entity_type: u8) -> Self {
        Self {
            entity_type,
            owner: NetworkId::NONE,
            parent: NetworkId::NONE,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn owned_by(mut self, owner: NetworkId) -> Self {
        self.owner = owner;
        self
    }

    pub fn child_of(mut self, parent: NetworkId) -> Self {
        self.parent = parent;
        self
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotated(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Server-side view of a networked entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: NetworkId,
    pub entity_type: u8,
    pub owner: NetworkId,
    pub parent: NetworkId,
    pub position: Vec3,
    pub rotation: Quat,
    children: Vec<NetworkId>,
    added: bool,
}

impl EntityRecord {
    pub fn children(&self) -> &[NetworkId] {
        &self.children
    }

    /// Set once the add message has been broadcast and gameplay has been told.
    pub fn is_added(&self) -> bool {
        self.added
    }

    pub fn add_message(&self) -> EntityAddMessage {
        EntityAddMessage::new(
            self.id,
            self.entity_type,
            self.owner,
            self.parent,
            self.position,
            self.rotation,
        )
    }
}

/// The entity hierarchy, iterated parent before children.
///
/// Roots and each entity's children keep insertion order, so traversal order is
/// stable across ticks.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<NetworkId, EntityRecord>,
    roots: Vec<NetworkId>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: NetworkId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn get(&self, id: NetworkId) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut EntityRecord> {
        self.entities.get_mut(&id)
    }

    /// Registers `id` under `spawn.parent`. The parent must already be registered.
    pub fn insert(&mut self, id: NetworkId, spawn: EntitySpawn) -> &mut EntityRecord {
        assert!(id.is_some(), "entities need an allocated identity");
        assert!(!self.contains(id), "entity {id} is already registered");

        if spawn.parent.is_some() {
            let parent = self
                .entities
                .get_mut(&spawn.parent)
                .unwrap_or_else(|| panic!("parent {} of entity {id} is not registered", spawn.parent));
            parent.children.push(id);
        } else {
            self.roots.push(id);
        }

        self.entities.entry(id).or_insert(EntityRecord {
            id,
            entity_type: spawn.entity_type,
            owner: spawn.owner,
            parent: spawn.parent,
            position: spawn.position,
            rotation: spawn.rotation,
            children: Vec::new(),
            added: false,
        })
    }

    pub(crate) fn mark_added(&mut self, id: NetworkId) {
        if let Some(record) = self.entities.get_mut(&id) {
            record.added = true;
        }
    }

    /// Unregisters a leaf entity. Children have to be removed first.
    pub fn remove(&mut self, id: NetworkId) -> Option<EntityRecord> {
        let record = self.entities.remove(&id)?;
        assert!(
            record.children.is_empty(),
            "entity {id} removed while it still has {} children",
            record.children.len()
        );

        let siblings = match self.entities.get_mut(&record.parent) {
            Some(parent) => &mut parent.children,
            None => &mut self.roots,
        };
        siblings.retain(|&sibling| sibling != id);
        Some(record)
    }

    /// Every entity, each parent ahead of its children.
    pub fn pre_order(&self) -> Vec<NetworkId> {
        let mut order = Vec::with_capacity(self.entities.len());
        let mut stack: Vec<NetworkId> = self.roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(record) = self.entities.get(&id) {
                stack.extend(record.children.iter().rev().copied());
            }
        }

        order
    }

    /// `id` and its descendants, children ahead of their parent; the removal order.
    pub fn subtree_post_order(&self, id: NetworkId) -> Vec<NetworkId> {
        if !self.contains(id) {
            return Vec::new();
        }

        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            if let Some(record) = self.entities.get(&id) {
                stack.extend(record.children.iter().rev().map(|&child| (child, false)));
            }
        }

        order
    }

    /// Entities owned by `owner` whose parent is not owned by it too.
    pub fn owned_roots(&self, owner: NetworkId) -> Vec<NetworkId> {
        self.pre_order()
            .into_iter()
            .filter(|id| {
                self.entities.get(id).is_some_and(|record| {
                    record.owner == owner
                        && self
                            .entities
                            .get(&record.parent)
                            .is_none_or(|parent| parent.owner != owner)
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.roots.clear();
    }
}

/// Messages produced by a gameplay hook, broadcast by the session afterwards.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<Message>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<Message>) {
        self.messages.push(message.into());
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.messages.drain(..)
    }
}

/// Gameplay side of server synchronization.
///
/// The session frames and queues whatever the hooks produce; it never interprets why an
/// update fired.
#[allow(unused_variables)]
pub trait GameWorld {
    /// Called after the entity's add message went out to every client.
    fn on_entity_added(&mut self, entity: &EntityRecord) {}

    /// Called before the entity's remove message goes out.
    fn on_entity_removed(&mut self, entity: &EntityRecord) {}

    /// Queues this tick's unreliable updates for `entity`. The hook may also refresh
    /// the record's transform so late joiners get the current one.
    fn broadcast_updates(&mut self, entity: &mut EntityRecord, out: &mut Outbox);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u16) -> NetworkId {
        NetworkId::from_raw(raw)
    }

    #[test]
    fn pre_order_puts_parents_first() {
        let mut registry = EntityRegistry::new();
        registry.insert(id(1), EntitySpawn::new(0));
        registry.insert(id(2), EntitySpawn::new(0).child_of(id(1)));
        registry.insert(id(3), EntitySpawn::new(0));
        registry.insert(id(4), EntitySpawn::new(0).child_of(id(2)));
        registry.insert(id(5), EntitySpawn::new(0).child_of(id(1)));

        assert_eq!(registry.pre_order(), vec![id(1), id(2), id(4), id(5), id(3)]);
        assert_eq!(registry.subtree_post_order(id(1)), vec![id(4), id(2), id(5), id(1)]);
    }

    #[test]
    fn deep_chain_stays_ordered() {
        let mut registry = EntityRegistry::new();
        registry.insert(id(0), EntitySpawn::new(0));
        for raw in 1..500 {
            registry.insert(id(raw), EntitySpawn::new(0).child_of(id(raw - 1)));
        }

        let order = registry.pre_order();
        assert_eq!(order, (0..500).map(id).collect::<Vec<_>>());

        let removal = registry.subtree_post_order(id(0));
        for entity in removal {
            registry.remove(entity);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn removal_unlinks_from_parent() {
        let mut registry = EntityRegistry::new();
        registry.insert(id(1), EntitySpawn::new(0));
        registry.insert(id(2), EntitySpawn::new(0).child_of(id(1)));

        let removed = registry.remove(id(2)).unwrap();
        assert_eq!(removed.parent, id(1));
        assert!(registry.get(id(1)).unwrap().children().is_empty());
        assert!(registry.remove(id(2)).is_none());
    }

    #[test]
    #[should_panic(expected = "still has 1 children")]
    fn removing_a_parent_first_panics() {
        let mut registry = EntityRegistry::new();
        registry.insert(id(1), EntitySpawn::new(0));
        registry.insert(id(2), EntitySpawn::new(0).child_of(id(1)));
        registry.remove(id(1));
    }

    #[test]
    #[should_panic(expected = "is not registered")]
    fn unknown_parent_panics() {
        let mut registry = EntityRegistry::new();
        registry.insert(id(2), EntitySpawn::new(0).child_of(id(1)));
    }

    #[test]
    fn owned_roots_skip_owned_children() {
        let mut registry = EntityRegistry::new();
        let owner = id(100);
        registry.insert(id(1), EntitySpawn::new(0));
        registry.insert(id(2), EntitySpawn::new(1).owned_by(owner).child_of(id(1)));
        registry.insert(id(3), EntitySpawn::new(2).owned_by(owner).child_of(id(2)));
        registry.insert(id(4), EntitySpawn::new(1).owned_by(owner));

        assert_eq!(registry.owned_roots(owner), vec![id(2), id(4)]);
    }

    #[test]
    fn add_message_mirrors_record() {
        let mut registry = EntityRegistry::new();
        let record = registry.insert(id(9), EntitySpawn::new(4).at(Vec3::X).owned_by(id(1)));
        let message = record.add_message();
        assert_eq!(message.entity, id(9));
        assert_eq!(message.entity_type, 4);
        assert_eq!(message.owner, id(1));
        assert_eq!(message.parent, NetworkId::NONE);
        assert_eq!(message.position, Vec3::X);
    }
}
