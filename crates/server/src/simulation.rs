use std::collections::{BTreeMap, HashMap};

use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use arena::message::{
    PlayerInputMessage, UpdateAvatarMessage, UpdateRayMessage, UpdateTransformMessage,
};
use arena::sync::EntityRecord;
use arena::{GameWorld, InputKeys, InputSlot, NetworkId, Outbox, keys_down};

pub const AVATAR: u8 = 1;
/// Held weapon, attached to its avatar.
pub const WEAPON: u8 = 2;

const ARENA_HALF_EXTENT: f32 = 40.0;
const MOVE_SPEED: f32 = 6.0;
const EYE_HEIGHT: f32 = 1.6;
const HIT_RADIUS: f32 = 0.6;
pub const MAX_HEALTH: f32 = 100.0;
/// Seconds of double damage granted for a kill.
const KILL_POWER_UP: f32 = 5.0;

#[derive(Debug, Clone, Copy)]
struct Weapon {
    damage: f32,
    range: f32,
    cooldown: f32,
}

const WEAPONS: [Weapon; 2] = [
    Weapon {
        damage: 12.0,
        range: 30.0,
        cooldown: 0.15,
    },
    Weapon {
        damage: 45.0,
        range: 60.0,
        cooldown: 1.0,
    },
];

#[derive(Debug, Clone)]
pub struct Avatar {
    pub player: NetworkId,
    pub entity: NetworkId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub aim: Vec3,
    pub weapon: u8,
    pub firing: bool,
    pub health: f32,
    pub power_up: f32,
    cooldown: f32,
    shot: Option<(Vec3, Vec3)>,
}

impl Avatar {
    fn new(player: NetworkId, entity: NetworkId, position: Vec3) -> Self {
        Self {
            player,
            entity,
            position,
            velocity: Vec3::ZERO,
            aim: position + Vec3::NEG_Z,
            weapon: 0,
            firing: false,
            health: MAX_HEALTH,
            power_up: 0.0,
            cooldown: 0.0,
            shot: None,
        }
    }

    fn eye(&self) -> Vec3 {
        self.position + Vec3::Y * EYE_HEIGHT
    }

    fn heading(&self) -> Quat {
        let flat = (self.aim - self.position) * Vec3::new(1.0, 0.0, 1.0);
        if flat.length_squared() < 1e-6 {
            return Quat::IDENTITY;
        }
        let flat = flat.normalize();
        Quat::from_rotation_y(f32::atan2(-flat.x, -flat.z))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kill {
    pub killer: NetworkId,
    pub victim: NetworkId,
}

/// A flat deathmatch arena: one avatar per player, hitscan weapons.
pub struct Arena {
    avatars: BTreeMap<NetworkId, Avatar>,
    owners: HashMap<NetworkId, NetworkId>,
    rng: StdRng,
}

impl Arena {
    pub fn new(seed: u64) -> Self {
        Self {
            avatars: BTreeMap::new(),
            owners: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn avatar(&self, player: NetworkId) -> Option<&Avatar> {
        self.avatars.get(&player)
    }

    pub fn avatars(&self) -> impl Iterator<Item = &Avatar> {
        self.avatars.values()
    }

    pub fn spawn_point(&mut self) -> Vec3 {
        let x = self.rng.random_range(-ARENA_HALF_EXTENT..ARENA_HALF_EXTENT);
        let z = self.rng.random_range(-ARENA_HALF_EXTENT..ARENA_HALF_EXTENT);
        Vec3::new(x, 0.0, z)
    }

    pub fn apply_input(&mut self, player: NetworkId, input: &PlayerInputMessage) {
        let Some(avatar) = self.avatars.get_mut(&player) else {
            log::trace!("input for player {} without an avatar", player);
            return;
        };

        let keys = keys_down(input);
        let mut direction = Vec3::ZERO;
        if keys.contains(InputKeys::FORWARD) {
            direction.z -= 1.0;
        }
        if keys.contains(InputKeys::BACK) {
            direction.z += 1.0;
        }
        if keys.contains(InputKeys::LEFT) {
            direction.x -= 1.0;
        }
        if keys.contains(InputKeys::RIGHT) {
            direction.x += 1.0;
        }
        avatar.velocity = direction.normalize_or_zero() * MOVE_SPEED;
        avatar.aim = input.aim;
        avatar.firing = keys.contains(InputKeys::FIRE_PRIMARY);

        let count = WEAPONS.len() as u8;
        if just_pressed(input, InputSlot::WeaponNext) {
            avatar.weapon = (avatar.weapon + 1) % count;
        }
        if just_pressed(input, InputSlot::WeaponPrev) {
            avatar.weapon = (avatar.weapon + count - 1) % count;
        }
    }

    /// Advances the arena by `dt` seconds and returns the kills that happened.
    pub fn step(&mut self, dt: f32) -> Vec<Kill> {
        let mut shots = Vec::new();
        for avatar in self.avatars.values_mut() {
            avatar.position += avatar.velocity * dt;
            avatar.position.x = avatar.position.x.clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT);
            avatar.position.z = avatar.position.z.clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT);
            avatar.cooldown = (avatar.cooldown - dt).max(0.0);
            avatar.power_up = (avatar.power_up - dt).max(0.0);

            if avatar.firing && avatar.cooldown == 0.0 {
                let weapon = WEAPONS[usize::from(avatar.weapon) % WEAPONS.len()];
                avatar.cooldown = weapon.cooldown;
                let damage = if avatar.power_up > 0.0 {
                    weapon.damage * 2.0
                } else {
                    weapon.damage
                };
                shots.push((avatar.player, avatar.eye(), avatar.aim, weapon.range, damage));
            }
        }

        let mut kills = Vec::new();
        for (shooter, origin, aim, range, damage) in shots {
            let direction = (aim - origin).normalize_or_zero();
            if direction == Vec3::ZERO {
                continue;
            }

            let hit = self
                .avatars
                .values()
                .filter(|target| target.player != shooter && target.health > 0.0)
                .filter_map(|target| {
                    ray_hit(origin, direction, target.eye() - Vec3::Y * 0.5, HIT_RADIUS)
                        .filter(|&distance| distance <= range)
                        .map(|distance| (target.player, distance))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1));

            let end = origin + direction * hit.map_or(range, |(_, distance)| distance);
            if let Some(avatar) = self.avatars.get_mut(&shooter) {
                avatar.shot = Some((origin, end));
            }

            let Some((victim, _)) = hit else {
                continue;
            };
            let Some(target) = self.avatars.get_mut(&victim) else {
                continue;
            };
            target.health -= damage;
            if target.health <= 0.0 {
                kills.push(Kill {
                    killer: shooter,
                    victim,
                });
            }
        }

        for kill in &kills {
            let position = self.spawn_point();
            if let Some(victim) = self.avatars.get_mut(&kill.victim) {
                victim.health = MAX_HEALTH;
                victim.power_up = 0.0;
                victim.position = position;
            }
            if let Some(killer) = self.avatars.get_mut(&kill.killer) {
                killer.power_up = KILL_POWER_UP;
            }
        }
        kills
    }
}

impl GameWorld for Arena {
    fn on_entity_added(&mut self, entity: &EntityRecord) {
        if entity.entity_type != AVATAR {
            return;
        }
        log::debug!("avatar {} spawned for player {}", entity.id, entity.owner);
        self.owners.insert(entity.id, entity.owner);
        self.avatars
            .insert(entity.owner, Avatar::new(entity.owner, entity.id, entity.position));
    }

    fn on_entity_removed(&mut self, entity: &EntityRecord) {
        if let Some(player) = self.owners.remove(&entity.id) {
            self.avatars.remove(&player);
        }
    }

    fn broadcast_updates(&mut self, entity: &mut EntityRecord, out: &mut Outbox) {
        let Some(player) = self.owners.get(&entity.id) else {
            return;
        };
        let Some(avatar) = self.avatars.get_mut(player) else {
            return;
        };

        entity.position = avatar.position;
        entity.rotation = avatar.heading();
        out.push(UpdateTransformMessage::new(
            entity.id,
            entity.position,
            entity.rotation,
        ));
        out.push(UpdateAvatarMessage::new(
            entity.id,
            avatar.velocity,
            avatar.aim,
            avatar.weapon,
            avatar.firing,
        ));
        if let Some((start, end)) = avatar.shot.take() {
            out.push(UpdateRayMessage::new(entity.id, start, end));
        }
    }
}

/// Pressed in the latest sample but not the one before.
fn just_pressed(input: &PlayerInputMessage, slot: InputSlot) -> bool {
    input.history[slot.index()] & 0b11 == 0b01
}

/// Distance along a normalized ray to the first intersection with a sphere.
fn ray_hit(origin: Vec3, direction: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let to_center = center - origin;
    let along = to_center.dot(direction);
    if along < 0.0 {
        return None;
    }
    let miss_sq = to_center.length_squared() - along * along;
    let radius_sq = radius * radius;
    if miss_sq > radius_sq {
        return None;
    }
    Some(along - (radius_sq - miss_sq).sqrt())
}

#[cfg(test)]
mod tests {
    use arena::message::INPUT_SLOTS;
    use arena::{EntitySpawn, ServerSession, SessionConfig};

    use super::*;

    fn input(frame: u32, keys: InputKeys, aim: Vec3) -> PlayerInputMessage {
        let mut history = [0u8; INPUT_SLOTS];
        for slot in InputSlot::ALL {
            history[slot.index()] = u8::from(keys.contains(slot.key()));
        }
        PlayerInputMessage::new(frame, history, aim)
    }

    fn spawn_avatar(
        session: &mut ServerSession,
        arena: &mut Arena,
        player: NetworkId,
        at: Vec3,
    ) -> NetworkId {
        let avatar = session.spawn_entity(arena, EntitySpawn::new(AVATAR).owned_by(player).at(at));
        session.spawn_entity(
            arena,
            EntitySpawn::new(WEAPON).owned_by(player).child_of(avatar),
        );
        avatar
    }

    #[test]
    fn avatar_follows_entity_lifecycle() {
        let mut session = ServerSession::new(SessionConfig::default());
        let mut arena = Arena::new(1);
        let player = NetworkId::from_raw(40);

        let avatar = spawn_avatar(&mut session, &mut arena, player, Vec3::ONE);
        assert_eq!(arena.avatar(player).map(|a| a.entity), Some(avatar));
        assert_eq!(arena.avatar(player).map(|a| a.position), Some(Vec3::ONE));

        assert_eq!(session.despawn_entity(&mut arena, avatar), 2);
        assert!(arena.avatar(player).is_none());
    }

    #[test]
    fn movement_is_clamped_to_the_arena() {
        let mut session = ServerSession::new(SessionConfig::default());
        let mut arena = Arena::new(1);
        let player = NetworkId::from_raw(40);
        spawn_avatar(&mut session, &mut arena, player, Vec3::ZERO);

        arena.apply_input(player, &input(1, InputKeys::FORWARD | InputKeys::RIGHT, Vec3::ZERO));
        arena.step(1.0);
        let moved = arena.avatar(player).unwrap().position;
        assert!((moved.length() - MOVE_SPEED).abs() < 1e-4);
        assert!(moved.x > 0.0 && moved.z < 0.0);

        for _ in 0..100 {
            arena.step(1.0);
        }
        let position = arena.avatar(player).unwrap().position;
        assert_eq!(position.x, ARENA_HALF_EXTENT);
        assert_eq!(position.z, -ARENA_HALF_EXTENT);
    }

    #[test]
    fn weapon_switch_needs_a_fresh_press() {
        let mut session = ServerSession::new(SessionConfig::default());
        let mut arena = Arena::new(1);
        let player = NetworkId::from_raw(40);
        spawn_avatar(&mut session, &mut arena, player, Vec3::ZERO);

        let mut held = input(1, InputKeys::WEAPON_NEXT, Vec3::ZERO);
        arena.apply_input(player, &held);
        assert_eq!(arena.avatar(player).unwrap().weapon, 1);

        held.history[InputSlot::WeaponNext.index()] = 0b11;
        arena.apply_input(player, &held);
        assert_eq!(arena.avatar(player).unwrap().weapon, 1);
    }

    #[test]
    fn shooting_kills_and_respawns() {
        let mut session = ServerSession::new(SessionConfig::default());
        let mut arena = Arena::new(1);
        let shooter = NetworkId::from_raw(40);
        let victim = NetworkId::from_raw(41);
        spawn_avatar(&mut session, &mut arena, shooter, Vec3::ZERO);
        spawn_avatar(&mut session, &mut arena, victim, Vec3::new(0.0, 0.0, -10.0));

        let target = Vec3::new(0.0, EYE_HEIGHT - 0.5, -10.0);
        arena.apply_input(shooter, &input(1, InputKeys::FIRE_PRIMARY, target));

        let mut kills = Vec::new();
        for _ in 0..200 {
            kills.extend(arena.step(0.05));
            if !kills.is_empty() {
                break;
            }
        }
        assert_eq!(kills, vec![Kill { killer: shooter, victim }]);

        let respawned = arena.avatar(victim).unwrap();
        assert_eq!(respawned.health, MAX_HEALTH);
        assert!(arena.avatar(shooter).unwrap().power_up > 0.0);
    }

    #[test]
    fn missed_shot_still_draws_a_ray() {
        let mut session = ServerSession::new(SessionConfig::default());
        let mut arena = Arena::new(1);
        let player = NetworkId::from_raw(40);
        let avatar = spawn_avatar(&mut session, &mut arena, player, Vec3::ZERO);

        arena.apply_input(player, &input(1, InputKeys::FIRE_PRIMARY, Vec3::new(0.0, 0.0, -50.0)));
        assert!(arena.step(0.01).is_empty());

        let mut record = session.entities().get(avatar).unwrap().clone();
        let mut out = Outbox::new();
        arena.broadcast_updates(&mut record, &mut out);
        // Transform, avatar state and the shot.
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn ray_hits_sphere_in_front_only() {
        let hit = ray_hit(Vec3::ZERO, Vec3::NEG_Z, Vec3::new(0.0, 0.0, -5.0), 1.0);
        assert_eq!(hit, Some(4.0));
        assert!(ray_hit(Vec3::ZERO, Vec3::Z, Vec3::new(0.0, 0.0, -5.0), 1.0).is_none());
        assert!(ray_hit(Vec3::ZERO, Vec3::NEG_Z, Vec3::new(3.0, 0.0, -5.0), 1.0).is_none());
    }
}
