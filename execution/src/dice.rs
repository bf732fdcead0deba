use dicearena_types::dice::{DIE_FACES, DOUBLE_BONUS};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Faces shown by one throw of two dice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roll {
    pub die1: u8,
    pub die2: u8,
}

impl Roll {
    pub fn new(die1: u8, die2: u8) -> Self {
        Self { die1, die2 }
    }

    /// Sum of both dice.
    pub fn total(&self) -> u32 {
        self.die1 as u32 + self.die2 as u32
    }

    pub fn is_double(&self) -> bool {
        self.die1 == self.die2
    }

    pub fn bonus(&self) -> u32 {
        if self.is_double() {
            DOUBLE_BONUS
        } else {
            0
        }
    }

    /// Points added to the roller's score.
    pub fn points(&self) -> u32 {
        self.total() + self.bonus()
    }
}

/// Source of dice throws. Called with the lobby store lock held.
pub trait DiceRoller: Send {
    fn roll(&mut self) -> Roll;
}

/// Two independent uniform dice.
pub struct RandomDice<R: RngCore + Send = ChaCha20Rng> {
    rng: R,
}

impl RandomDice<ChaCha20Rng> {
    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha20Rng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

impl<R: RngCore + Send> RandomDice<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore + Send> DiceRoller for RandomDice<R> {
    fn roll(&mut self) -> Roll {
        Roll::new(
            self.rng.gen_range(1..=DIE_FACES),
            self.rng.gen_range(1..=DIE_FACES),
        )
    }
}
