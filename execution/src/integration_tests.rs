//! Integration tests for full matches.
//!
//! These drive the engine from lobby creation through rolling to settlement against the
//! in-memory collaborators.

#[cfg(test)]
mod tests {
    use crate::{
        dice::RandomDice,
        lobby::{Rules, StartMode, TerminationPolicy, TieBreak},
        mocks::{Fault, Faulty, ScriptedDice},
        Account, Backend, Effects, Engine, EngineConfig, Error, FileJournal, MemoryJournal,
        Memory,
    };
    use dicearena_types::{
        api::Frame,
        dice::{ConnectionId, LobbyStatus, Slot, TokenType, HISTORY_COUNTER_SEED},
    };
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    const ANN: ConnectionId = ConnectionId(1);
    const BOB: ConnectionId = ConnectionId(2);
    const CY: ConnectionId = ConnectionId(3);

    fn accounts() -> Vec<Account> {
        vec![
            Account::new("EQann", "Ann").with_balance(TokenType::Ton, 10.0),
            Account::new("EQbob", "Bob").with_balance(TokenType::Ton, 10.0),
            Account::new("EQcy", "Cy").with_balance(TokenType::Ton, 10.0),
            Account::new("EQpoor", "Poor").with_balance(TokenType::Ton, 0.5),
        ]
    }

    fn engine_with<B: Backend>(backend: B, rules: Rules, dice: ScriptedDice) -> Engine<B> {
        Engine::new(
            Arc::new(backend),
            Arc::new(MemoryJournal::default()),
            EngineConfig {
                rules,
                ..Default::default()
            },
        )
        .with_dice(Box::new(dice))
    }

    fn engine(dice: ScriptedDice) -> Engine<Memory> {
        engine_with(Memory::new(accounts()), Rules::default(), dice)
    }

    async fn create<B: Backend>(engine: &Engine<B>, conn: ConnectionId, wallet: &str) -> String {
        let (_, effects) = engine
            .create_lobby(conn, wallet, "Ann", 25, "ton_balance", 1.0)
            .await
            .unwrap();
        match effects.frames_for(conn)[..] {
            [Frame::LobbyCreated { lobby_id, .. }] => lobby_id.clone(),
            ref other => panic!("unexpected frames {other:?}"),
        }
    }

    fn game_overs(effects: &Effects, conn: ConnectionId) -> Vec<Slot> {
        effects
            .frames_for(conn)
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::GameOver { winner, .. } => Some(*winner),
                _ => None,
            })
            .collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// Create, join, and roll until the match ends; settlement credits 1.8 and debits 1.0.
    #[tokio::test]
    async fn test_full_match_settles() {
        let engine = engine(ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        let lobby = engine.store().get(&lobby_id).unwrap();
        assert_eq!(lobby.status(), LobbyStatus::Waiting);
        assert!(lobby.seat(Slot::Player2).is_none());

        let (_, effects) = engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        assert!(effects.lobbies_changed);
        assert!(matches!(effects.frames_for(ANN)[..], [Frame::GameStart(_)]));
        assert!(matches!(
            effects.frames_for(BOB)[..],
            [Frame::JoinedLobby { .. }, Frame::GameStart(_)]
        ));
        let lobby = engine.store().get(&lobby_id).unwrap();
        assert_eq!(lobby.status(), LobbyStatus::InProgress);
        assert_eq!(lobby.current_turn(), Slot::Player1);

        // Scripted fallback throws (1, 2): both reach 27 in round 9, tie goes to the creator.
        let mut overs = (Vec::new(), Vec::new());
        let mut turn = ANN;
        for _ in 0..100 {
            let effects = engine.roll_dice(turn, &lobby_id).await.unwrap();
            overs.0.extend(game_overs(&effects, ANN));
            overs.1.extend(game_overs(&effects, BOB));
            if effects.lobbies_changed {
                break;
            }
            turn = if turn == ANN { BOB } else { ANN };
        }
        assert_eq!(overs.0, vec![Slot::Player1]);
        assert_eq!(overs.1, vec![Slot::Player1]);
        assert!(engine.store().get(&lobby_id).is_none());
        assert!(engine.open_lobbies().is_empty());

        let memory = engine.backend();
        assert!(close(memory.account("EQann").unwrap().ton_balance, 11.8));
        assert!(close(memory.account("EQbob").unwrap().ton_balance, 9.0));
        let records = memory.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].counter, HISTORY_COUNTER_SEED + 1);
        assert_eq!(records[0].winner, "Ann");
        assert_eq!(records[0].player1_score, 27);

        assert_eq!(
            engine.roll_dice(ANN, &lobby_id).await.unwrap_err(),
            Error::LobbyNotFound
        );
    }

    #[tokio::test]
    async fn test_joiner_wins() {
        let dice = ScriptedDice::new([(1, 2), (6, 6), (1, 2), (6, 6)]);
        let engine = engine(dice);
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        for conn in [ANN, BOB, ANN] {
            let effects = engine.roll_dice(conn, &lobby_id).await.unwrap();
            assert!(game_overs(&effects, conn).is_empty());
        }
        let effects = engine.roll_dice(BOB, &lobby_id).await.unwrap();
        assert_eq!(game_overs(&effects, ANN), vec![Slot::Player2]);
        assert_eq!(game_overs(&effects, BOB), vec![Slot::Player2]);
        assert!(matches!(
            effects.frames_for(BOB)[1],
            Frame::GameOver { winner_name, .. } if winner_name == "Bob"
        ));
    }

    #[tokio::test]
    async fn test_turn_change_frames() {
        let engine = engine(ScriptedDice::new([(3, 3)]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();

        let effects = engine.roll_dice(ANN, &lobby_id).await.unwrap();
        for conn in [ANN, BOB] {
            match effects.frames_for(conn)[..] {
                [Frame::PartialRoundResult(result), Frame::TurnChange {
                    current_turn,
                    current_round,
                }] => {
                    assert_eq!(result.total_roll, 6);
                    assert_eq!(result.bonus, 1);
                    assert_eq!(result.player1_score, 7);
                    assert_eq!(*current_turn, Slot::Player2);
                    assert_eq!(*current_round, 1);
                }
                ref other => panic!("unexpected frames {other:?}"),
            }
        }

        assert_eq!(
            engine.roll_dice(ANN, &lobby_id).await.unwrap_err(),
            Error::NotYourTurn
        );
        assert_eq!(
            engine.roll_dice(CY, &lobby_id).await.unwrap_err(),
            Error::NotAParticipant
        );
    }

    #[tokio::test]
    async fn test_create_with_insufficient_balance() {
        let engine = engine(ScriptedDice::new([]));
        let err = engine
            .create_lobby(ANN, "EQpoor", "Poor", 25, "ton_balance", 1.0)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InsufficientFunds);
        assert!(engine.store().is_empty());

        let err = engine
            .create_lobby(ANN, "EQann", "Ann", 25, "btc_balance", 1.0)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidToken("btc_balance".to_string()));
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_failed_join_relists_lobby() {
        let engine = engine(ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        assert_eq!(
            engine
                .join_lobby(BOB, &lobby_id, "EQpoor", "Poor")
                .await
                .unwrap_err(),
            Error::InsufficientFunds
        );
        assert_eq!(engine.open_lobbies().len(), 1);
        engine
            .join_lobby(CY, &lobby_id, "EQcy", "Cy")
            .await
            .unwrap();
        assert!(engine.open_lobbies().is_empty());
    }

    #[tokio::test]
    async fn test_second_create_rejected_before_ledger() {
        let engine = engine_with(
            Faulty::new(Memory::new(accounts())),
            Rules::default(),
            ScriptedDice::new([]),
        );
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine.backend().inject(Fault::Balance);
        assert_eq!(
            engine
                .create_lobby(ANN, "EQann", "Ann", 25, "ton_balance", 1.0)
                .await
                .unwrap_err(),
            Error::AlreadySeated(lobby_id)
        );
        assert_eq!(engine.store().len(), 1);
    }

    #[tokio::test]
    async fn test_creator_wallet_cannot_join_own_lobby() {
        let engine = engine(ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        assert_eq!(
            engine
                .join_lobby(BOB, &lobby_id, "EQann", "Ann")
                .await
                .unwrap_err(),
            Error::Validation("cannot join your own lobby".to_string())
        );
        assert_eq!(engine.open_lobbies().len(), 1);
        assert_eq!(engine.store().seated_in(BOB), None);
        assert!(close(
            engine.backend().account("EQann").unwrap().ton_balance,
            10.0
        ));
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_both_players_leaving_drops_match() {
        let engine = engine(ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        engine.disconnect(ANN);
        assert_eq!(engine.store().len(), 1);
        let effects = engine.disconnect(BOB);
        assert!(effects.messages.is_empty());
        assert!(engine.store().is_empty());
        for wallet in ["EQann", "EQbob"] {
            assert!(close(engine.backend().account(wallet).unwrap().ton_balance, 10.0));
        }
    }

    #[tokio::test]
    async fn test_racing_joins() {
        let engine = Arc::new(engine(ScriptedDice::new([])));
        let lobby_id = create(&*engine, ANN, "EQann").await;

        let first = {
            let engine = engine.clone();
            let lobby_id = lobby_id.clone();
            tokio::spawn(async move { engine.join_lobby(BOB, &lobby_id, "EQbob", "Bob").await })
        };
        let second = {
            let engine = engine.clone();
            let lobby_id = lobby_id.clone();
            tokio::spawn(async move { engine.join_lobby(CY, &lobby_id, "EQcy", "Cy").await })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::LobbyNotFound))));

        let lobby = engine.store().get(&lobby_id).unwrap();
        assert_eq!(lobby.status(), LobbyStatus::InProgress);
        assert_eq!(lobby.connections().len(), 2);
    }

    #[tokio::test]
    async fn test_join_started_lobby_matches_missing_lobby() {
        let engine = engine(ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        let started = engine
            .join_lobby(CY, &lobby_id, "EQcy", "Cy")
            .await
            .unwrap_err();
        let missing = engine
            .join_lobby(CY, "424242", "EQcy", "Cy")
            .await
            .unwrap_err();
        assert_eq!(started, missing);
    }

    #[tokio::test]
    async fn test_delete_and_disconnect() {
        let engine = engine(ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        assert!(matches!(
            engine.delete_lobby(BOB, &lobby_id),
            Err(Error::PermissionDenied(_))
        ));
        let effects = engine.delete_lobby(ANN, &lobby_id).unwrap();
        assert!(effects.lobbies_changed);
        assert!(matches!(
            effects.frames_for(ANN)[..],
            [Frame::LobbyDeleted { .. }]
        ));

        create(&engine, ANN, "EQann").await;
        assert_eq!(engine.open_lobbies().len(), 1);
        let effects = engine.disconnect(ANN);
        assert!(effects.lobbies_changed);
        assert!(engine.open_lobbies().is_empty());
        assert_eq!(engine.lobby_list(), Frame::LobbyList { lobbies: vec![] });
    }

    #[tokio::test]
    async fn test_terminate_settles_like_natural_finish() {
        let engine = engine(ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        let effects = engine
            .terminate(ANN, &lobby_id, Slot::Player2)
            .await
            .unwrap();
        for conn in [ANN, BOB] {
            assert!(matches!(
                effects.frames_for(conn)[..],
                [Frame::GameTerminated {
                    winner: Slot::Player2,
                    ..
                }]
            ));
        }
        let memory = engine.backend();
        assert!(close(memory.account("EQbob").unwrap().ton_balance, 11.8));
        assert!(close(memory.account("EQann").unwrap().ton_balance, 9.0));
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_concede_only_termination() {
        let rules = Rules {
            termination: TerminationPolicy::ConcedeOnly,
            ..Default::default()
        };
        let engine = engine_with(Memory::new(accounts()), rules, ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        assert!(matches!(
            engine.terminate(ANN, &lobby_id, Slot::Player1).await,
            Err(Error::PermissionDenied(_))
        ));
        engine.disconnect(BOB);
        engine
            .terminate(ANN, &lobby_id, Slot::Player1)
            .await
            .unwrap();
        assert!(close(
            engine.backend().account("EQann").unwrap().ton_balance,
            11.8
        ));
    }

    #[tokio::test]
    async fn test_ledger_failure_reports_errors_to_both() {
        let backend = Faulty::new(Memory::new(accounts())).fail(Fault::Ledger);
        let engine = engine_with(backend, Rules::default(), ScriptedDice::new([(6, 6)]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        let effects = engine
            .terminate(BOB, &lobby_id, Slot::Player1)
            .await
            .unwrap();
        for conn in [ANN, BOB] {
            assert!(matches!(effects.frames_for(conn)[..], [Frame::Error { .. }]));
        }
        assert!(effects.lobbies_changed);
        assert!(engine.store().is_empty());
        assert!(close(
            engine.backend().inner().account("EQann").unwrap().ton_balance,
            10.0
        ));
    }

    #[tokio::test]
    async fn test_settlement_warnings_are_routed() {
        let backend = Faulty::new(Memory::new(accounts()))
            .fail(Fault::Referral)
            .fail(Fault::History);
        let engine = engine_with(backend, Rules::default(), ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        let effects = engine
            .terminate(ANN, &lobby_id, Slot::Player2)
            .await
            .unwrap();
        let warnings = |conn| {
            effects
                .frames_for(conn)
                .into_iter()
                .filter(|frame| matches!(frame, Frame::Warning { .. }))
                .count()
        };
        assert_eq!(warnings(BOB), 2);
        assert_eq!(warnings(ANN), 1);
    }

    #[tokio::test]
    async fn test_handshake_mode() {
        let rules = Rules {
            start_mode: StartMode::Handshake,
            ..Default::default()
        };
        let engine = engine_with(Memory::new(accounts()), rules, ScriptedDice::new([]));
        let lobby_id = create(&engine, ANN, "EQann").await;
        let (_, effects) = engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        assert!(matches!(
            effects.frames_for(ANN)[..],
            [Frame::JoinedLobby { .. }]
        ));
        assert_eq!(
            engine.roll_dice(ANN, &lobby_id).await.unwrap_err(),
            Error::LobbyNotFound
        );

        let effects = engine.confirm_ready(BOB, &lobby_id).unwrap();
        assert!(matches!(
            effects.frames_for(BOB)[..],
            [Frame::ReadyConfirmation { .. }]
        ));
        assert_eq!(
            engine.confirm_ready(BOB, &lobby_id).unwrap_err(),
            Error::AlreadyReady
        );
        let effects = engine.confirm_ready(ANN, &lobby_id).unwrap();
        assert!(matches!(
            effects.frames_for(BOB)[..],
            [Frame::GameStart(_)]
        ));
        assert!(matches!(
            effects.frames_for(ANN)[..],
            [Frame::ReadyConfirmation { .. }, Frame::GameStart(_)]
        ));
        engine.roll_dice(ANN, &lobby_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_with_file_journal() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(Faulty::new(Memory::new(accounts())).fail(Fault::Ledger));
        let engine = Engine::new(
            memory.clone(),
            Arc::new(FileJournal::open(dir.path()).unwrap()),
            EngineConfig::default(),
        );
        let lobby_id = create(&engine, ANN, "EQann").await;
        engine
            .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
            .await
            .unwrap();
        engine
            .terminate(ANN, &lobby_id, Slot::Player1)
            .await
            .unwrap();
        assert!(memory.inner().records().is_empty());

        // A fresh engine over the same journal finishes the settlement.
        memory.heal();
        let restarted = Engine::new(
            memory.clone(),
            Arc::new(FileJournal::open(dir.path()).unwrap()),
            EngineConfig::default(),
        );
        assert_eq!(restarted.recover().await.unwrap(), 1);
        assert_eq!(restarted.recover().await.unwrap(), 0);
        assert_eq!(memory.inner().records().len(), 1);
        assert!(close(
            memory.inner().account("EQann").unwrap().ton_balance,
            11.8
        ));
    }

    /// Random legal and illegal rolls never break strict alternation.
    #[tokio::test]
    async fn test_turns_alternate_strictly() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for seed in 0..20u64 {
            let rules = Rules {
                tie_break: TieBreak::ExtraRound,
                ..Default::default()
            };
            let engine = Engine::new(
                Arc::new(Memory::new(accounts())),
                Arc::new(MemoryJournal::default()),
                EngineConfig {
                    rules,
                    ..Default::default()
                },
            )
            .with_dice(Box::new(RandomDice::seeded(seed)));
            let lobby_id = create(&engine, ANN, "EQann").await;
            engine
                .join_lobby(BOB, &lobby_id, "EQbob", "Bob")
                .await
                .unwrap();

            let mut expected = Slot::Player1;
            let mut round = 1;
            loop {
                let before = engine.store().get(&lobby_id).unwrap();
                let conn = if rng.gen_bool(0.3) {
                    // Out of turn.
                    let wrong = if expected == Slot::Player1 { BOB } else { ANN };
                    assert_eq!(
                        engine.roll_dice(wrong, &lobby_id).await.unwrap_err(),
                        Error::NotYourTurn
                    );
                    let after = engine.store().get(&lobby_id).unwrap();
                    assert_eq!(after.score(Slot::Player1), before.score(Slot::Player1));
                    assert_eq!(after.score(Slot::Player2), before.score(Slot::Player2));
                    assert_eq!(after.current_round(), before.current_round());
                    continue;
                } else if expected == Slot::Player1 {
                    ANN
                } else {
                    BOB
                };
                let effects = engine.roll_dice(conn, &lobby_id).await.unwrap();
                if effects.lobbies_changed {
                    assert_eq!(expected, Slot::Player2);
                    break;
                }
                let lobby = engine.store().get(&lobby_id).unwrap();
                if expected == Slot::Player2 {
                    round += 1;
                    assert_eq!(lobby.pending(Slot::Player1), None);
                    assert_eq!(lobby.pending(Slot::Player2), None);
                }
                expected = expected.other();
                assert_eq!(lobby.current_turn(), expected);
                assert_eq!(lobby.current_round(), round);
            }
        }
    }
}
