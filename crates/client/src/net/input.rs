use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use arena::sync::ClientWorld;
use arena::{InputKeys, InputSlot, InputSource, NetworkId};

/// Entity type of player avatars in the arena.
pub const AVATAR: u8 = 1;

const ENGAGE_RANGE: f32 = 25.0;
const EYE_HEIGHT: f32 = 1.6;
const MOVES: [InputKeys; 5] = [
    InputKeys::empty(),
    InputKeys::FORWARD,
    InputKeys::BACK,
    InputKeys::LEFT,
    InputKeys::RIGHT,
];

/// Scripted player: wanders, and fires at the nearest avatar in range.
pub struct BotInput {
    rng: StdRng,
    held: InputKeys,
    aim: Vec3,
    frames_until_turn: u32,
}

impl BotInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            held: InputKeys::empty(),
            aim: Vec3::NEG_Z,
            frames_until_turn: 0,
        }
    }

    pub fn held(&self) -> InputKeys {
        self.held
    }

    /// Picks this frame's controls from the replicated world.
    pub fn think(&mut self, world: &ClientWorld) {
        let movement = InputKeys::FORWARD | InputKeys::BACK | InputKeys::LEFT | InputKeys::RIGHT;
        let mut keys = self.held & movement;
        if self.frames_until_turn == 0 {
            keys = MOVES[self.rng.random_range(0..MOVES.len())];
            self.frames_until_turn = self.rng.random_range(30..120);
            if self.rng.random_bool(0.1) {
                keys |= InputKeys::WEAPON_NEXT;
            }
        } else {
            self.frames_until_turn -= 1;
        }

        let me = world.local_player().and_then(|player| avatar_position(world, player));
        if let Some(me) = me {
            let target = world
                .entities()
                .filter(|entity| entity.entity_type == AVATAR)
                .filter(|entity| Some(entity.owner) != world.local_player())
                .map(|entity| entity.position)
                .min_by(|a, b| a.distance_squared(me).total_cmp(&b.distance_squared(me)));

            match target {
                Some(target) => {
                    self.aim = target + Vec3::Y * (EYE_HEIGHT - 0.5);
                    if target.distance(me) <= ENGAGE_RANGE {
                        keys |= InputKeys::FIRE_PRIMARY;
                    }
                }
                None => self.aim = me + Vec3::NEG_Z,
            }
        }
        self.held = keys;
    }
}

impl InputSource for BotInput {
    fn is_triggered(&self, slot: InputSlot) -> bool {
        self.held.contains(slot.key())
    }

    fn aim_target(&self) -> Vec3 {
        self.aim
    }
}

fn avatar_position(world: &ClientWorld, player: NetworkId) -> Option<Vec3> {
    world
        .entities()
        .find(|entity| entity.entity_type == AVATAR && entity.owner == player)
        .map(|entity| entity.position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_world_only_wanders() {
        let world = ClientWorld::default();
        let mut bot = BotInput::new(3);
        for _ in 0..500 {
            bot.think(&world);
            assert!(!bot.is_triggered(InputSlot::FirePrimary));
        }
        assert_eq!(bot.aim_target(), Vec3::NEG_Z);
    }

    #[test]
    fn same_seed_same_moves() {
        let world = ClientWorld::default();
        let mut a = BotInput::new(9);
        let mut b = BotInput::new(9);
        for _ in 0..300 {
            a.think(&world);
            b.think(&world);
            assert_eq!(a.held(), b.held());
        }
    }
}
