use dicearena_types::dice::{MatchKind, TokenType};

/// Loyalty points earned by one wager.
///
/// The base is a bet-size tier of the token multiplied by the wager; the outcome bonus
/// depends on whether the wager won and who it was placed against.
pub fn points_for_bet(token: TokenType, bet_amount: f64, is_win: bool, kind: MatchKind) -> f64 {
    let rate = match token {
        TokenType::Ton => match bet_amount {
            b if (1.0..3.0).contains(&b) => 0.4,
            b if (3.0..5.0).contains(&b) => 0.6,
            b if (5.0..=8.0).contains(&b) => 0.8,
            b if b > 8.0 => 1.0,
            _ => 0.0,
        },
        TokenType::M5 => match bet_amount {
            b if (3.0..5.0).contains(&b) => 0.15,
            b if (5.0..=10.0).contains(&b) => 0.225,
            b if b > 10.0 && b <= 20.0 => 0.27,
            b if b > 20.0 => 0.34,
            _ => 0.0,
        },
        TokenType::Dfc => match bet_amount {
            b if (6.0..12.0).contains(&b) => 0.06,
            b if (12.0..=24.0).contains(&b) => 0.09,
            b if b > 24.0 && b <= 48.0 => 0.11,
            b if b > 48.0 => 0.13,
            _ => 0.0,
        },
    };
    let bonus = match (kind, is_win) {
        (MatchKind::Pvp, true) => 0.5,
        (MatchKind::Pvp, false) => 0.25,
        (MatchKind::Bot, true) => 0.25,
        (MatchKind::Bot, false) => 0.125,
    };
    bet_amount * rate + bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ton_tiers() {
        assert!(close(points_for_bet(TokenType::Ton, 0.5, true, MatchKind::Pvp), 0.5));
        assert!(close(points_for_bet(TokenType::Ton, 1.0, true, MatchKind::Pvp), 0.9));
        assert!(close(points_for_bet(TokenType::Ton, 3.0, false, MatchKind::Pvp), 2.05));
        assert!(close(points_for_bet(TokenType::Ton, 8.0, true, MatchKind::Bot), 6.65));
        assert!(close(points_for_bet(TokenType::Ton, 10.0, false, MatchKind::Bot), 10.125));
    }

    #[test]
    fn test_m5_tiers() {
        assert!(close(points_for_bet(TokenType::M5, 2.0, false, MatchKind::Pvp), 0.25));
        assert!(close(points_for_bet(TokenType::M5, 4.0, true, MatchKind::Pvp), 1.1));
        assert!(close(points_for_bet(TokenType::M5, 10.0, true, MatchKind::Pvp), 2.75));
        assert!(close(points_for_bet(TokenType::M5, 20.0, true, MatchKind::Pvp), 5.9));
        assert!(close(points_for_bet(TokenType::M5, 40.0, true, MatchKind::Pvp), 14.1));
    }

    #[test]
    fn test_dfc_tiers() {
        assert!(close(points_for_bet(TokenType::Dfc, 6.0, true, MatchKind::Pvp), 0.86));
        assert!(close(points_for_bet(TokenType::Dfc, 24.0, false, MatchKind::Pvp), 2.41));
        assert!(close(points_for_bet(TokenType::Dfc, 48.0, false, MatchKind::Pvp), 5.53));
        assert!(close(points_for_bet(TokenType::Dfc, 100.0, false, MatchKind::Pvp), 13.25));
    }
}
