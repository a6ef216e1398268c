#![cfg(test)]

use std::time::Duration;

use uuid::Uuid;

use super::errors::{BetRejection, ConfigError};
use super::events::EngineEvent;
use super::round::HistoryEntry;
use super::machine::{EngineConfig, Now, RoundEngine};
use super::sampler::test_support::{draw_for, ScriptedDraws};
use super::types::{payout_for, Phase};

const STEP: Duration = Duration::from_millis(100);

fn config() -> EngineConfig {
    EngineConfig {
        house_edge: 1.0,
        max_multiplier: 50.0,
        growth_rate: 0.62,
        bet_window: Duration::from_secs(8),
        cooldown: Duration::from_millis(2_500),
        tick_interval: STEP,
        history_len: 3,
    }
}

fn engine_with(draws: impl IntoIterator<Item = f64>) -> (RoundEngine, Now) {
    let start = Now::capture();
    let engine = RoundEngine::new(config(), Box::new(ScriptedDraws::new(draws)), start)
        .expect("valid config");
    (engine, start)
}

/// Elapsed flight time at which the curve passes `multiplier`, nudged past float error.
fn time_to_reach(multiplier: f64) -> Duration {
    Duration::from_secs_f64(multiplier.ln() / 0.62 + 1e-6)
}

fn take_off(engine: &mut RoundEngine, opened: Now) -> Now {
    let now = opened.after(engine.config().bet_window);
    let events = engine.tick(now);
    assert!(matches!(events.first(), Some(EngineEvent::RoundStarted { .. })));
    assert_eq!(engine.phase(), Phase::Flying);
    now
}

/// Ticks at the reference cadence until the round crashes, returning the crash instant and
/// every event produced on the way.
fn fly_until_crash(engine: &mut RoundEngine, started: Now) -> (Now, Vec<EngineEvent>) {
    let mut now = started;
    let mut events = Vec::new();
    for _ in 0..10_000 {
        now = now.after(STEP);
        events.extend(engine.tick(now));
        if engine.phase() == Phase::Crashed {
            return (now, events);
        }
    }
    panic!("round never crashed");
}

fn cash_out(engine: &mut RoundEngine, user: &Uuid) -> Vec<EngineEvent> {
    match engine.quote_cashout(user) {
        Some(quote) => engine.commit_cashout(&quote),
        None => Vec::new(),
    }
}

fn place(engine: &mut RoundEngine, user: Uuid, credits: f64, auto: Option<f64>) {
    let amount = engine.check_bet(&user, credits, auto).expect("bet accepted");
    engine
        .record_bet(user, "alice".into(), amount, auto)
        .expect("bet recorded");
}

#[test]
fn waiting_holds_until_bet_window_closes() {
    let (mut engine, start) = engine_with([0.5]);
    assert_eq!(engine.phase(), Phase::Waiting);
    assert!(engine.tick(start.after(Duration::from_millis(7_900))).is_empty());
    assert_eq!(engine.phase(), Phase::Waiting);
    take_off(&mut engine, start);
}

#[test]
fn phases_cycle_in_order_and_reset_the_round() {
    let (mut engine, start) = engine_with([0.5, 0.75]);
    let first_round = engine.round().id;
    let user = Uuid::new_v4();
    place(&mut engine, user, 10.0, None);

    let started = take_off(&mut engine, start);
    assert!(engine.round().started_at.is_some());
    let (crashed, events) = fly_until_crash(&mut engine, started);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::RoundCrashed { summary } if summary.round_id == first_round)));

    // cooldown has not elapsed yet
    assert!(engine.tick(crashed.after(Duration::from_millis(2_400))).is_empty());
    let events = engine.tick(crashed.after(Duration::from_millis(2_500)));
    assert!(matches!(events.first(), Some(EngineEvent::RoundOpened { .. })));
    assert!(matches!(events.last(), Some(EngineEvent::StateChanged(s)) if s.phase == Phase::Waiting));

    assert_eq!(engine.phase(), Phase::Waiting);
    assert_ne!(engine.round().id, first_round);
    assert_eq!(engine.round().current_multiplier, 1.0);
    assert!((engine.round().crash_multiplier() - 4.0).abs() < 1e-12);
    assert!(engine.ledger().is_empty());
}

#[test]
fn multiplier_climbs_monotonically_and_freezes_at_crash() {
    let (mut engine, start) = engine_with([draw_for(1.0, 2.5)]);
    let crash = engine.round().crash_multiplier();
    let started = take_off(&mut engine, start);
    let (_, events) = fly_until_crash(&mut engine, started);

    let ticks: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::MultiplierTick { multiplier, .. } => Some(*multiplier),
            _ => None,
        })
        .collect();
    assert!(!ticks.is_empty());
    assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    assert!(ticks.iter().all(|m| *m >= 1.0 && *m < crash));
    assert_eq!(engine.round().current_multiplier, crash);
}

#[test]
fn late_ticks_land_on_the_closed_form_curve() {
    let (mut engine, start) = engine_with([draw_for(1.0, 10.0)]);
    let started = take_off(&mut engine, start);
    let elapsed = Duration::from_millis(1_500);
    let events = engine.tick(started.after(elapsed));
    let expected = engine.multiplier_at(elapsed);
    assert!(matches!(
        events.as_slice(),
        [EngineEvent::MultiplierTick { multiplier, .. }] if *multiplier == expected
    ));
    assert!((expected - (0.62f64 * 1.5).exp()).abs() < 1e-12);
}

#[test]
fn manual_cashout_at_two_pays_double() {
    let (mut engine, start) = engine_with([0.75]);
    let user = Uuid::new_v4();
    place(&mut engine, user, 100.0, None);
    let started = take_off(&mut engine, start);

    engine.tick(started.after(time_to_reach(2.0)));
    let at = engine.round().current_multiplier;
    assert!(at >= 2.0 && at < 2.01);

    let events = cash_out(&mut engine, &user);
    match events.as_slice() {
        [EngineEvent::CashedOut { wager, auto: false }] => {
            assert_eq!(wager.cashed_out_at(), Some(at));
            assert_eq!(wager.payout(), 20_000);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[test]
fn second_cashout_is_a_noop() {
    let (mut engine, start) = engine_with([0.75]);
    let user = Uuid::new_v4();
    place(&mut engine, user, 50.0, None);
    let started = take_off(&mut engine, start);
    engine.tick(started.after(Duration::from_millis(500)));

    assert_eq!(cash_out(&mut engine, &user).len(), 1);
    engine.tick(started.after(Duration::from_millis(900)));
    assert!(cash_out(&mut engine, &user).is_empty());
    let wager = engine.ledger().get(&user).expect("wager kept");
    assert_eq!(wager.payout(), payout_for(5_000, wager.cashed_out_at().unwrap_or(0.0)));
}

#[test]
fn cashout_outside_flight_or_without_wager_is_ignored() {
    let (mut engine, start) = engine_with([0.5]);
    let user = Uuid::new_v4();
    place(&mut engine, user, 10.0, None);
    assert!(cash_out(&mut engine, &user).is_empty());

    let started = take_off(&mut engine, start);
    engine.tick(started.after(STEP));
    assert!(cash_out(&mut engine, &Uuid::new_v4()).is_empty());

    fly_until_crash(&mut engine, started);
    assert!(cash_out(&mut engine, &user).is_empty());
}

#[test]
fn auto_cashout_fires_on_first_tick_past_threshold() {
    let (mut engine, start) = engine_with([0.75]);
    let user = Uuid::new_v4();
    place(&mut engine, user, 100.0, Some(1.5));
    let started = take_off(&mut engine, start);

    let mut now = started;
    let mut previous = 1.0;
    loop {
        now = now.after(STEP);
        let events = engine.tick(now);
        if let Some(EngineEvent::CashedOut { wager, auto }) = events.first() {
            let at = wager.cashed_out_at().expect("cashed");
            assert!(*auto);
            assert!(at >= 1.5);
            assert!(previous < 1.5);
            assert_eq!(wager.payout(), payout_for(10_000, at));
            break;
        }
        previous = engine.round().current_multiplier;
        assert_eq!(engine.phase(), Phase::Flying);
    }
}

#[test]
fn auto_cashout_on_crashing_tick_still_wins() {
    let (mut engine, start) = engine_with([0.5]);
    let user = Uuid::new_v4();
    place(&mut engine, user, 100.0, Some(2.0));
    let started = take_off(&mut engine, start);

    // one late tick jumps far past both the threshold and the crash point
    let events = engine.tick(started.after(Duration::from_secs(3)));
    let cashed = events
        .iter()
        .position(|e| matches!(e, EngineEvent::CashedOut { auto: true, .. }))
        .expect("auto cashout");
    let crashed = events
        .iter()
        .position(|e| matches!(e, EngineEvent::RoundCrashed { .. }))
        .expect("crash");
    assert!(cashed < crashed);
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::BetLost { .. })));
    assert_eq!(engine.ledger().get(&user).map(|w| w.payout()), Some(20_000));
}

#[test]
fn quoting_a_cashout_settles_nothing() {
    let (mut engine, start) = engine_with([0.75]);
    let user = Uuid::new_v4();
    place(&mut engine, user, 100.0, None);
    let started = take_off(&mut engine, start);
    engine.tick(started.after(time_to_reach(2.0)));

    let quote = engine.quote_cashout(&user).expect("open wager in flight");
    assert!(!quote.auto);
    assert_eq!(quote.payout, payout_for(10_000, quote.multiplier));
    assert!(engine.ledger().get(&user).expect("wager").is_open());

    // dropping the quote leaves the wager to ride on
    engine.tick(started.after(time_to_reach(2.5)));
    let later = engine.quote_cashout(&user).expect("still open");
    assert!(later.multiplier > quote.multiplier);
    match engine.commit_cashout(&later).as_slice() {
        [EngineEvent::CashedOut { wager, auto: false }] => {
            assert_eq!(wager.payout(), later.payout);
        }
        other => panic!("unexpected events: {other:?}"),
    }
    assert!(engine.commit_cashout(&later).is_empty());
}

#[test]
fn uncommitted_auto_cashout_loses_at_the_crash() {
    let (mut engine, start) = engine_with([0.5]);
    let user = Uuid::new_v4();
    place(&mut engine, user, 100.0, Some(1.5));
    let started = take_off(&mut engine, start);

    // past both the threshold and the crash point, but the payout never lands
    let now = started.after(Duration::from_secs(3));
    let due = engine.advance(now);
    assert_eq!(due.len(), 1);
    assert!(due[0].auto);
    assert_eq!(due[0].user_id, user);

    let events = engine.finish_tick(now);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::BetLost { wager } if wager.user_id == user)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::CashedOut { .. })));
    assert!(engine.commit_cashout(&due[0]).is_empty());
    assert_eq!(engine.ledger().get(&user).map(|w| w.payout()), Some(0));
}

#[test]
fn crash_settles_open_wagers_as_losses_once() {
    let (mut engine, start) = engine_with([draw_for(1.0, 1.01)]);
    let loser = Uuid::new_v4();
    place(&mut engine, loser, 100.0, None);
    let started = take_off(&mut engine, start);
    let (crashed, events) = fly_until_crash(&mut engine, started);

    let lost: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::BetLost { wager } => Some(wager),
            _ => None,
        })
        .collect();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].user_id, loser);
    assert_eq!(lost[0].payout(), 0);

    assert!(engine.tick(crashed.after(STEP)).is_empty());
    assert!(cash_out(&mut engine, &loser).is_empty());
}

#[test]
fn bets_outside_waiting_are_wrong_phase() {
    let (mut engine, start) = engine_with([0.5]);
    let user = Uuid::new_v4();
    let started = take_off(&mut engine, start);
    assert_eq!(
        engine.check_bet(&user, 10.0, None),
        Err(BetRejection::WrongPhase(Phase::Flying))
    );
    assert_eq!(
        engine.record_bet(user, "late".into(), 1_000, None),
        Err(BetRejection::WrongPhase(Phase::Flying))
    );
    fly_until_crash(&mut engine, started);
    assert_eq!(
        engine.check_bet(&user, 10.0, None),
        Err(BetRejection::WrongPhase(Phase::Crashed))
    );
}

#[test]
fn malformed_bets_are_invalid_input() {
    let (mut engine, _) = engine_with([0.5]);
    let user = Uuid::new_v4();
    for amount in [0.0, -5.0, f64::NAN, 0.001] {
        assert!(matches!(
            engine.check_bet(&user, amount, None),
            Err(BetRejection::InvalidInput(_))
        ));
    }
    for threshold in [0.5, f64::INFINITY, f64::NAN] {
        assert!(matches!(
            engine.check_bet(&user, 10.0, Some(threshold)),
            Err(BetRejection::InvalidInput(_))
        ));
    }
    assert_eq!(engine.check_bet(&user, 12.346, Some(1.0)), Ok(1_235));

    place(&mut engine, user, 10.0, None);
    assert_eq!(engine.check_bet(&user, 10.0, None), Err(BetRejection::DuplicateBet));
    assert_eq!(
        engine.record_bet(user, "alice".into(), 1_000, None),
        Err(BetRejection::DuplicateBet)
    );
    assert_eq!(engine.ledger().len(), 1);
}

#[test]
fn snapshot_hides_crash_point_until_crash() {
    let (mut engine, start) = engine_with([0.5]);
    place(&mut engine, Uuid::new_v4(), 25.0, Some(1.8));

    let waiting = engine.snapshot(start.after(Duration::from_secs(3)).instant);
    assert_eq!(waiting.phase, Phase::Waiting);
    assert_eq!(waiting.time_to_bet_ms, 5_000);
    assert_eq!(waiting.crash_at, None);
    assert_eq!(waiting.live.len(), 1);
    assert_eq!(waiting.live[0].amount, 25.0);
    assert!(!serde_json::to_string(&waiting).unwrap().contains("crashAt"));

    let started = take_off(&mut engine, start);
    let flying = engine.snapshot(started.instant);
    assert_eq!(flying.crash_at, None);
    assert_eq!(flying.time_to_bet_ms, 0);

    let (crashed, _) = fly_until_crash(&mut engine, started);
    let snapshot = engine.snapshot(crashed.instant);
    assert_eq!(snapshot.crash_at, Some(2.0));
    assert_eq!(snapshot.multiplier, 2.0);
    assert_eq!(snapshot.history.len(), 1);
}

#[test]
fn history_is_bounded_and_newest_first() {
    let (mut engine, start) = engine_with([0.5]);
    let mut opened = start;
    let mut round_ids = Vec::new();
    for _ in 0..4 {
        round_ids.push(engine.round().id);
        let started = take_off(&mut engine, opened);
        let (crashed, _) = fly_until_crash(&mut engine, started);
        opened = crashed.after(engine.config().cooldown);
        engine.tick(opened);
    }
    let history = engine.history().entries();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].round_id, round_ids[3]);
    assert_eq!(history[2].round_id, round_ids[1]);
    assert!(history.iter().all(|h| h.crash_at == 2.0));
}

#[test]
fn invalid_config_is_refused() {
    let start = Now::capture();
    let cases = [
        (EngineConfig { house_edge: 0.0, ..config() }, ConfigError::HouseEdge(0.0)),
        (EngineConfig { house_edge: 1.2, ..config() }, ConfigError::HouseEdge(1.2)),
        (EngineConfig { max_multiplier: 0.5, ..config() }, ConfigError::Cap(0.5)),
        (EngineConfig { growth_rate: 0.0, ..config() }, ConfigError::GrowthRate(0.0)),
        (
            EngineConfig { tick_interval: Duration::ZERO, ..config() },
            ConfigError::Zero("tick interval"),
        ),
        (EngineConfig { history_len: 0, ..config() }, ConfigError::Zero("history length")),
    ];
    for (cfg, expected) in cases {
        let result = RoundEngine::new(cfg, Box::new(ScriptedDraws::new([0.5])), start);
        assert_eq!(result.err(), Some(expected));
    }
}

#[test]
fn restored_history_keeps_order_and_capacity() {
    let (mut engine, _) = engine_with([0.5]);
    let now = chrono::Utc::now();
    let entries: Vec<HistoryEntry> = (0..5)
        .map(|i| HistoryEntry {
            round_id: Uuid::new_v4(),
            crash_at: 1.0 + i as f64,
            ended_at: now,
        })
        .collect();
    engine.restore_history(entries.clone());
    assert_eq!(engine.history().entries(), entries[..3].to_vec());
}
