/// Display name used when a client omits `first_name`.
pub const DEFAULT_FIRST_NAME: &str = "Player";

/// Lobby identifiers are this many zero-padded decimal digits.
pub const LOBBY_ID_DIGITS: usize = 6;

/// Exclusive upper bound of the numeric lobby identifier space.
pub const LOBBY_ID_SPACE: u32 = 1_000_000;

/// Faces on each die.
pub const DIE_FACES: u8 = 6;

/// Bonus points awarded when both dice show the same face.
pub const DOUBLE_BONUS: u32 = 1;

/// Basis point denominator (10_000 = 100%).
pub const BASIS_POINTS: u64 = 10_000;

/// Fee withheld from the doubled wager before crediting the winner (10%).
pub const DEFAULT_FEE_BPS: u64 = 1_000;

/// Share of the doubled wager distributed up the winner's referral chain (10%).
pub const DEFAULT_REFERRAL_REWARD_BPS: u64 = 1_000;

/// Per-level split of the referral reward: 5%, 2%, 1%.
pub const DEFAULT_REFERRAL_LEVEL_BPS: [u64; 3] = [500, 200, 100];

/// Value the match counter document is initialized with; the first record gets seed + 1.
pub const HISTORY_COUNTER_SEED: u64 = 13_999;
