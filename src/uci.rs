//! The UCI protocol adapter. The main thread owns stdin and the engine
//! configuration; exactly one background worker runs a search at a time and
//! owns the engine (behind a mutex) for its duration. The worker talks back
//! through stdout only; diagnostics go to stderr.

use std::io::BufRead;
use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc, Mutex,
};
use std::thread::JoinHandle;

use chess::ChessMove;

use crate::{
    config::EngineConfig,
    definitions::{Score, MATE_BOUND, MATE_SCORE},
    engine::{compute_time_budget, Engine, IterationInfo, SearchLimits, SearchResult},
    errors::UciError,
    position::Position,
    search::SearchControl,
    NAME, VERSION,
};

// Why the last search stopped; decides whether a bestmove line is owed.
const STOP_NONE: u8 = 0;
const STOP_CMD: u8 = 1;
const STOP_INTERNAL: u8 = 2;

/// Standard UCI score formatting: centipawns, or full moves to mate with
/// the winner's sign.
#[must_use]
pub fn format_score(score: Score) -> String {
    if score > MATE_BOUND {
        format!("mate {}", (MATE_SCORE - score + 1) / 2)
    } else if score < -MATE_BOUND {
        format!("mate -{}", (MATE_SCORE + score + 1) / 2)
    } else {
        format!("cp {score}")
    }
}

fn print_iteration_info(info: &IterationInfo) {
    let mut line = format!(
        "info depth {} score {} nodes {} time {} nps {}",
        info.depth,
        format_score(info.score),
        info.nodes,
        (info.time_seconds * 1000.0).round() as i64,
        info.nps.round() as i64,
    );
    if !info.pv_uci.is_empty() {
        line.push_str(" pv ");
        line.push_str(&info.pv_uci);
    }
    println!("{line}");
}

fn print_search_output(
    result: &SearchResult,
    best: ChessMove,
    ponder: Option<ChessMove>,
    include_ponder: bool,
) {
    let tt_total = result.tt_hits + result.tt_misses;
    let tt_hit_rate = if tt_total > 0 {
        100.0 * result.tt_hits as f64 / tt_total as f64
    } else {
        0.0
    };
    let branch = if result.depth_reached > 0 && result.nodes > 1 {
        (result.nodes as f64).powf(1.0 / f64::from(result.depth_reached))
    } else {
        0.0
    };
    eprintln!(
        "[GO] depth={} score={} nodes={} time={:.2}s nps={:.0} branch={branch:.2} \
         is_mate={} is_draw={} tt_hits={} tt_misses={} tt_hit_rate={tt_hit_rate:.1}% \
         q10={} q10r={} pvchg10={} pvlast={}d badcapN={} badcapP={} badcapS={} \
         badcapGN={} badcapG={} razorAttempts={} razorCutoffs={}",
        result.depth_reached,
        result.score,
        result.nodes,
        result.time_seconds,
        result.nps,
        u8::from(result.is_mate),
        u8::from(result.is_draw),
        result.tt_hits,
        result.tt_misses,
        result.quiet_searched_ge10,
        result.quiet_researched_ge10,
        result.pv_firstmove_changes_ge10,
        result.pv_last_change_depth,
        result.badcap_nodes,
        result.badcap_picked,
        result.badcap_searched,
        result.badcap_gen_nodes,
        result.badcap_generated,
        result.razor_attempts,
        result.razor_cutoffs,
    );

    let mut line = format!("bestmove {best}");
    if include_ponder {
        if let Some(p) = ponder {
            line.push_str(&format!(" ponder {p}"));
        }
    }
    println!("{line}");
}

// ----------------- command parsing -----------------

fn parse_position(text: &str, board: &mut Position) -> Result<(), UciError> {
    let mut parts = text.split_ascii_whitespace();
    parts.next(); // "position"
    let determiner = parts.next().ok_or_else(|| {
        UciError::UnexpectedCommandTermination("no determiner after \"position\"".into())
    })?;

    // the whole command is validated against a scratch position first, so
    // a bad FEN or an illegal move leaves the current position untouched
    let mut new_board = match determiner {
        "startpos" => Position::startpos(),
        "fen" => {
            let mut fen = String::new();
            for part in parts.by_ref() {
                if part == "moves" {
                    break;
                }
                fen.push_str(part);
                fen.push(' ');
            }
            let mut pos = Position::from_fen(fen.trim())?;
            for mv in parts {
                pos.apply_uci_move(mv).map_err(UciError::ParseMove)?;
            }
            *board = pos;
            return Ok(());
        }
        other => {
            return Err(UciError::InvalidFormat(format!(
                "unknown term after \"position\": {other}"
            )))
        }
    };

    match parts.next() {
        None => {}
        Some("moves") => {
            for mv in parts {
                new_board.apply_uci_move(mv).map_err(UciError::ParseMove)?;
            }
        }
        Some(other) => {
            return Err(UciError::InvalidFormat(format!(
                "expected \"moves\", got {other}"
            )))
        }
    }
    *board = new_board;
    Ok(())
}

fn go_number(token: &str, parts: &mut std::str::SplitAsciiWhitespace) -> Result<i64, UciError> {
    parts
        .next()
        .ok_or_else(|| UciError::ParseGo(format!("nothing after \"{token}\"")))?
        .parse()
        .map_err(|_| UciError::ParseGo(format!("value for \"{token}\" is not a number")))
}

fn parse_go(text: &str) -> Result<SearchLimits, UciError> {
    let mut limits = SearchLimits::default();
    let mut parts = text.split_ascii_whitespace();
    parts.next(); // "go"

    while let Some(token) = parts.next() {
        match token {
            "depth" => limits.depth = go_number(token, &mut parts)? as i32,
            "movetime" => limits.movetime_ms = go_number(token, &mut parts)?,
            "wtime" => limits.wtime_ms = go_number(token, &mut parts)?,
            "btime" => limits.btime_ms = go_number(token, &mut parts)?,
            "winc" => limits.winc_ms = go_number(token, &mut parts)?,
            "binc" => limits.binc_ms = go_number(token, &mut parts)?,
            "movestogo" => limits.movestogo = go_number(token, &mut parts)? as i32,
            "infinite" => limits.infinite = true,
            "ponder" => limits.ponder = true,
            // nodes, mate, searchmoves etc. are ignored
            _ => {}
        }
    }
    Ok(limits)
}

fn parse_bool_option(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Applies a `setoption` line to the config. Unknown names are ignored
/// silently; out-of-range values are clamped.
#[allow(clippy::too_many_lines)]
fn handle_setoption(text: &str, config: &mut EngineConfig, engine: &Arc<Mutex<Engine>>) {
    let rest = text.trim_start_matches("setoption").trim();
    let Some(rest) = rest.strip_prefix("name ") else {
        return;
    };
    let (name, value) = match rest.find(" value ") {
        Some(idx) => (rest[..idx].trim(), rest[idx + 7..].trim()),
        None => (rest.trim(), ""),
    };

    let int = |v: &str| v.parse::<i64>().ok();

    match name {
        "SearchDepth" => {
            if let Some(v) = int(value) {
                config.search_depth = v.clamp(1, 20) as i32;
            }
        }
        "MaxDepthTimed" => {
            if let Some(v) = int(value) {
                config.max_depth_timed = v.clamp(1, 128) as i32;
            }
        }
        "MoveOverhead" => {
            if let Some(v) = int(value) {
                config.move_overhead_ms = v.clamp(0, 2000);
            }
        }
        "Hash" => {
            if let Some(v) = int(value) {
                let mb = v.clamp(1, 4096) as usize;
                config.hash_mb = mb;
                engine.lock().expect("engine mutex poisoned").resize_tt_mb(mb);
            }
        }
        "Ponder" => config.ponder = parse_bool_option(value),
        "KingCrowdingScale" => {
            if let Some(v) = int(value) {
                config.king_crowding_scale = v.clamp(0, 100) as i32;
            }
        }
        "MobilityScale" => {
            if let Some(v) = int(value) {
                config.mobility_scale = v.clamp(0, 100) as i32;
            }
        }
        "XRayScale" => {
            if let Some(v) = int(value) {
                config.xray_scale = v.clamp(0, 30) as i32;
            }
        }
        "PSTScale" => {
            if let Some(v) = int(value) {
                config.pst_scale = v.clamp(0, 150) as i32;
            }
        }
        "ThreatTerm" => {
            if let Some(v) = int(value) {
                config.threat_term = v.clamp(0, 300) as i32;
            }
        }
        "UseStockPST" => config.use_stock_pst = parse_bool_option(value),
        "UseQuiescence" => config.use_quiescence = parse_bool_option(value),
        "UseRazoring" => config.use_razoring = parse_bool_option(value),
        "RazorMarginD2" => {
            if let Some(v) = int(value) {
                config.razor_margin_d2 = v.clamp(0, 1000) as Score;
            }
        }
        "RazorMarginD3" => {
            if let Some(v) = int(value) {
                config.razor_margin_d3 = v.clamp(0, 2000) as Score;
            }
        }
        "UseHistoryHeuristic" => config.use_history_heuristic = parse_bool_option(value),
        "UseCaptureHistory" => config.use_capture_history = parse_bool_option(value),
        "UseContinuationHistory" => config.use_continuation_history = parse_bool_option(value),
        "UseProbCut" => config.use_probcut = parse_bool_option(value),
        "GoodCaptureSEEThreshold" => {
            if let Some(v) = int(value) {
                config.good_capture_see_threshold_cp = v.clamp(-500, 500) as Score;
            }
        }
        "BadCapturePenalty" => {
            if let Some(v) = int(value) {
                config.bad_capture_penalty_cp = v.clamp(0, 2000) as Score;
            }
        }
        "KillerBonus1" => {
            if let Some(v) = int(value) {
                config.killer_bonus_1 = v.clamp(0, 200_000) as i32;
            }
        }
        "KillerBonus2" => {
            if let Some(v) = int(value) {
                config.killer_bonus_2 = v.clamp(0, 200_000) as i32;
            }
        }
        "CounterMoveBonus" => {
            if let Some(v) = int(value) {
                config.counter_move_bonus = v.clamp(0, 100_000) as i32;
            }
        }
        "HistoryBonusMult" => {
            if let Some(v) = int(value) {
                config.history_mult = v.clamp(0, 800) as i32;
            }
        }
        "ContinuationBonusMult" => {
            if let Some(v) = int(value) {
                config.continuation_mult = v.clamp(0, 800) as i32;
            }
        }
        "CaptureHistoryMult" => {
            if let Some(v) = int(value) {
                config.capture_history_mult = v.clamp(0, 800) as i32;
            }
        }
        "UseNullMovePruning" => config.use_null_move_pruning = parse_bool_option(value),
        "UseMoveCountPruning" => config.use_move_count_pruning = parse_bool_option(value),
        "UseCorrectionHistory" => config.use_correction_history = parse_bool_option(value),
        "CorrectionHistoryScale" => {
            if let Some(v) = int(value) {
                config.correction_scale = v.clamp(0, 200) as i32;
            }
        }
        _ => {} // unknown options are ignored
    }

    engine
        .lock()
        .expect("engine mutex poisoned")
        .set_config(config.clone());
}

fn print_uci_response(config: &EngineConfig) {
    let as_bool = |b: bool| if b { "true" } else { "false" };
    println!("id name {NAME} {VERSION}");
    println!("id author the {NAME} developers");

    println!(
        "option name SearchDepth type spin default {} min 1 max 20",
        config.search_depth
    );
    println!(
        "option name MaxDepthTimed type spin default {} min 1 max 128",
        config.max_depth_timed
    );
    println!(
        "option name MoveOverhead type spin default {} min 0 max 2000",
        config.move_overhead_ms
    );
    println!("option name Ponder type check default {}", as_bool(config.ponder));
    println!(
        "option name Hash type spin default {} min 1 max 4096",
        config.hash_mb
    );
    println!(
        "option name KingCrowdingScale type spin default {} min 0 max 100",
        config.king_crowding_scale
    );
    println!(
        "option name MobilityScale type spin default {} min 0 max 100",
        config.mobility_scale
    );
    println!(
        "option name XRayScale type spin default {} min 0 max 30",
        config.xray_scale
    );
    println!(
        "option name PSTScale type spin default {} min 0 max 150",
        config.pst_scale
    );
    println!(
        "option name ThreatTerm type spin default {} min 0 max 300",
        config.threat_term
    );
    println!(
        "option name UseQuiescence type check default {}",
        as_bool(config.use_quiescence)
    );
    println!(
        "option name UseRazoring type check default {}",
        as_bool(config.use_razoring)
    );
    println!(
        "option name RazorMarginD2 type spin default {} min 0 max 1000",
        config.razor_margin_d2
    );
    println!(
        "option name RazorMarginD3 type spin default {} min 0 max 2000",
        config.razor_margin_d3
    );
    println!(
        "option name UseHistoryHeuristic type check default {}",
        as_bool(config.use_history_heuristic)
    );
    println!(
        "option name UseCaptureHistory type check default {}",
        as_bool(config.use_capture_history)
    );
    println!(
        "option name UseContinuationHistory type check default {}",
        as_bool(config.use_continuation_history)
    );
    println!(
        "option name UseProbCut type check default {}",
        as_bool(config.use_probcut)
    );
    println!(
        "option name GoodCaptureSEEThreshold type spin default {} min -100 max 100",
        config.good_capture_see_threshold_cp
    );
    println!(
        "option name BadCapturePenalty type spin default {} min 0 max 250",
        config.bad_capture_penalty_cp
    );
    println!(
        "option name KillerBonus1 type spin default {} min 0 max 150000",
        config.killer_bonus_1
    );
    println!(
        "option name KillerBonus2 type spin default {} min 0 max 150000",
        config.killer_bonus_2
    );
    println!(
        "option name CounterMoveBonus type spin default {} min 0 max 30000",
        config.counter_move_bonus
    );
    println!(
        "option name HistoryBonusMult type spin default {} min 0 max 800",
        config.history_mult
    );
    println!(
        "option name ContinuationBonusMult type spin default {} min 0 max 800",
        config.continuation_mult
    );
    println!(
        "option name CaptureHistoryMult type spin default {} min 0 max 800",
        config.capture_history_mult
    );
    println!(
        "option name UseNullMovePruning type check default {}",
        as_bool(config.use_null_move_pruning)
    );
    println!(
        "option name UseMoveCountPruning type check default {}",
        as_bool(config.use_move_count_pruning)
    );
    println!(
        "option name UseCorrectionHistory type check default {}",
        as_bool(config.use_correction_history)
    );
    println!(
        "option name CorrectionHistoryScale type spin default {} min 0 max 200",
        config.correction_scale
    );
    println!("uciok");
}

// ----------------- search worker -----------------

struct SearchWorker {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    stop_reason: Arc<AtomicU8>,
    suppress_bestmove: Arc<AtomicBool>,
    pondering: Arc<AtomicBool>,
    /// True while the running search has no natural end (infinite/ponder).
    unbounded: bool,
    /// The running search's control block, for ponderhit conversion.
    control: Option<Arc<SearchControl>>,
    saved_ponder_limits: Option<SearchLimits>,
    last_ponder_move: Arc<Mutex<Option<ChessMove>>>,
}

impl SearchWorker {
    fn new() -> Self {
        Self {
            handle: None,
            stop: Arc::new(AtomicBool::new(false)),
            stop_reason: Arc::new(AtomicU8::new(STOP_NONE)),
            suppress_bestmove: Arc::new(AtomicBool::new(false)),
            pondering: Arc::new(AtomicBool::new(false)),
            unbounded: false,
            control: None,
            saved_ponder_limits: None,
            last_ponder_move: Arc::new(Mutex::new(None)),
        }
    }
}

fn handle_stop(worker: &mut SearchWorker, reason: u8, suppress_output: bool) {
    if let Some(handle) = worker.handle.take() {
        worker.stop_reason.store(reason, Ordering::Relaxed);
        worker
            .suppress_bestmove
            .store(suppress_output, Ordering::Relaxed);
        worker.stop.store(true, Ordering::Relaxed);
        let _ = handle.join();
    }
    worker.stop.store(false, Ordering::Relaxed);
    worker.stop_reason.store(STOP_NONE, Ordering::Relaxed);
    worker.suppress_bestmove.store(false, Ordering::Relaxed);
    worker.pondering.store(false, Ordering::Relaxed);
    worker.unbounded = false;
    worker.control = None;
}

/// A quick depth-1 probe of the reply position supplies the predicted move
/// behind `bestmove ... ponder ...`.
fn compute_ponder_move(engine: &mut Engine, root: &Position, best: ChessMove) -> Option<ChessMove> {
    let mut reply = root.clone();
    reply.make_move(best);
    let result = engine.search_depth(&mut reply, 1, None, None);
    result.best_move
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn start_search_async(
    worker: &mut SearchWorker,
    engine: &Arc<Mutex<Engine>>,
    config: &EngineConfig,
    board: &Position,
    limits: SearchLimits,
    pondering_mode: bool,
    ponder_move_to_apply: Option<ChessMove>,
) {
    // robustness: stop any current search first
    handle_stop(worker, STOP_INTERNAL, true);
    worker.pondering.store(pondering_mode, Ordering::Relaxed);
    if pondering_mode {
        worker.saved_ponder_limits = Some(limits);
    }

    let mut search_board = board.clone();
    if let Some(pm) = ponder_move_to_apply {
        if search_board.is_legal(pm) {
            search_board.make_move(pm);
        }
    }

    // decide mode: fixed depth wins, then infinite/ponder, then the clock
    let stop = Arc::clone(&worker.stop);
    let budget = compute_time_budget(&limits, search_board.turn(), config);
    let (control, max_depth, keep_searching) = if limits.depth > 0 {
        (SearchControl::new(Some(stop)), limits.depth, false)
    } else if limits.infinite || pondering_mode {
        (SearchControl::new(Some(stop)), 128, true)
    } else if budget.enabled {
        (
            SearchControl::with_budget(Some(stop), budget.soft_ms, budget.hard_ms),
            config.max_depth_timed.max(1),
            false,
        )
    } else {
        (SearchControl::new(Some(stop)), config.search_depth.max(1), false)
    };
    let control = Arc::new(control);
    worker.control = Some(Arc::clone(&control));
    worker.unbounded = keep_searching;

    eprintln!(
        "[TM] stm={} depth={} wtime={} btime={} winc={} binc={} movestogo={} movetime={} \
         soft={} hard={} overhead={} maxDepthTimed={} ponderOpt={} goPonder={} infinite={}",
        if search_board.turn() == chess::Color::White { 'w' } else { 'b' },
        if limits.depth > 0 { limits.depth } else { config.search_depth },
        limits.wtime_ms,
        limits.btime_ms,
        limits.winc_ms,
        limits.binc_ms,
        limits.movestogo,
        limits.movetime_ms,
        if budget.enabled { budget.soft_ms } else { 0 },
        if budget.enabled { budget.hard_ms } else { 0 },
        budget.overhead_ms,
        config.max_depth_timed,
        u8::from(config.ponder),
        u8::from(limits.ponder),
        u8::from(limits.infinite),
    );

    let engine = Arc::clone(engine);
    let stop_reason = Arc::clone(&worker.stop_reason);
    let suppress = Arc::clone(&worker.suppress_bestmove);
    let pondering = Arc::clone(&worker.pondering);
    let last_ponder_move = Arc::clone(&worker.last_ponder_move);
    let config = config.clone();

    worker.handle = Some(std::thread::spawn(move || {
        let mut pos = search_board;
        let mut guard = engine.lock().expect("engine mutex poisoned");

        let mut on_iter = |info: &IterationInfo| print_iteration_info(info);
        let result =
            guard.search_with_control(&mut pos, max_depth, &control, keep_searching, Some(&mut on_iter));

        // still pondering at the end means the search was cancelled before
        // a ponderhit; UCI owes a bestmove only after an explicit "stop"
        if pondering.load(Ordering::Relaxed) {
            if stop_reason.load(Ordering::Relaxed) == STOP_CMD && !suppress.load(Ordering::Relaxed)
            {
                let best = result
                    .best_move
                    .filter(|&m| pos.is_legal(m))
                    .or_else(|| pos.first_legal_move());
                match best {
                    Some(m) => println!("bestmove {m}"),
                    None => println!("bestmove 0000"),
                }
            }
            return;
        }

        // internal restarts must not emit a spurious bestmove
        if suppress.load(Ordering::Relaxed) {
            return;
        }

        let best = result
            .best_move
            .filter(|&m| pos.is_legal(m))
            .or_else(|| pos.first_legal_move());
        let Some(best) = best else {
            println!("bestmove 0000");
            return;
        };

        let ponder = if config.ponder {
            compute_ponder_move(&mut guard, &pos, best)
        } else {
            None
        };
        *last_ponder_move.lock().expect("ponder move mutex poisoned") = ponder;

        print_search_output(&result, best, ponder, config.ponder);
    }));
}

/// Converts an in-flight ponder search into a timed one: new deadlines are
/// installed through the shared control block, the worker never restarts.
fn handle_ponderhit(
    worker: &mut SearchWorker,
    config: &EngineConfig,
    board: &mut Position,
) {
    if !worker.pondering.load(Ordering::Relaxed) || worker.handle.is_none() {
        return;
    }
    let Some(mut limits) = worker.saved_ponder_limits.take() else {
        return;
    };
    limits.ponder = false;
    limits.infinite = false;

    // the opponent played the predicted move: sync the main board
    if let Some(pm) = *worker.last_ponder_move.lock().expect("ponder move mutex poisoned") {
        if board.is_legal(pm) {
            board.make_move(pm);
        }
    }

    let budget = compute_time_budget(&limits, board.turn(), config);
    if let Some(control) = &worker.control {
        if budget.enabled {
            control.install_budget(budget.soft_ms, budget.hard_ms);
            worker.pondering.store(false, Ordering::Relaxed);
            return;
        }
    }

    // no usable clock information: fall back to answering right away
    worker.pondering.store(false, Ordering::Relaxed);
    worker.stop_reason.store(STOP_CMD, Ordering::Relaxed);
    worker.stop.store(true, Ordering::Relaxed);
}

fn handle_go(
    input: &str,
    worker: &mut SearchWorker,
    engine: &Arc<Mutex<Engine>>,
    config: &EngineConfig,
    board: &Position,
) -> Result<(), UciError> {
    let mut limits = parse_go(input)?;
    // some GUIs send "go ponder" with the Ponder option off; treat it as a
    // normal timed search rather than hanging
    if limits.ponder && !config.ponder {
        limits.ponder = false;
    }

    if limits.ponder {
        // ponder on the stored prediction, or guess the opponent's reply
        // with a depth-1 probe
        let stored = *worker
            .last_ponder_move
            .lock()
            .expect("ponder move mutex poisoned");
        let ponder_move = stored.or_else(|| {
            let mut guard = engine.lock().expect("engine mutex poisoned");
            let mut probe = board.clone();
            guard.search_depth(&mut probe, 1, None, None).best_move
        });
        start_search_async(worker, engine, config, board, limits, true, ponder_move);
    } else {
        start_search_async(worker, engine, config, board, limits, false, None);
    }
    Ok(())
}

// ----------------- main loop -----------------

pub fn main_loop() -> anyhow::Result<()> {
    let mut config = EngineConfig::default();
    let engine = Arc::new(Mutex::new(Engine::new(config.clone())));
    let mut board = Position::startpos();
    let mut worker = SearchWorker::new();

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF: finish the in-flight search, then exit
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let res: Result<(), UciError> = match input {
            "uci" => {
                print_uci_response(&config);
                Ok(())
            }
            "isready" => {
                println!("readyok");
                Ok(())
            }
            "ucinewgame" => {
                handle_stop(&mut worker, STOP_INTERNAL, true);
                board = Position::startpos();
                let mut guard = engine.lock().expect("engine mutex poisoned");
                guard.reset_heuristics();
                guard.clear_tt();
                Ok(())
            }
            "stop" => {
                // a bestmove reply is required even in ponder mode
                handle_stop(&mut worker, STOP_CMD, false);
                Ok(())
            }
            "ponderhit" => {
                handle_ponderhit(&mut worker, &config, &mut board);
                Ok(())
            }
            "quit" => {
                handle_stop(&mut worker, STOP_INTERNAL, true);
                return Ok(());
            }
            _ if input.starts_with("setoption") => {
                handle_stop(&mut worker, STOP_INTERNAL, true);
                handle_setoption(input, &mut config, &engine);
                Ok(())
            }
            _ if input.starts_with("position") => {
                handle_stop(&mut worker, STOP_INTERNAL, true);
                parse_position(input, &mut board)
            }
            _ if input.starts_with("go") => {
                handle_stop(&mut worker, STOP_INTERNAL, true);
                handle_go(input, &mut worker, &engine, &config, &board)
            }
            other => Err(UciError::UnknownCommand(other.to_string())),
        };

        if let Err(e) = res {
            eprintln!("Error: {e}");
        }
    }

    // stdin closed without "quit": unbounded searches are stopped so the
    // pending bestmove can be emitted, bounded ones run to completion
    if worker.unbounded {
        worker.stop_reason.store(STOP_CMD, Ordering::Relaxed);
        worker.stop.store(true, Ordering::Relaxed);
    }
    if let Some(handle) = worker.handle.take() {
        let _ = handle.join();
    }
    Ok(())
}

// ----------------- bench -----------------

const BENCH_FENS: [&str; 8] = [
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    "r2qkb1r/pp2nppp/3p4/2pNN1B1/2BnP3/3P4/PPP2PPP/R2bK2R w KQkq - 1 10",
    "6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1",
    "8/8/4k3/8/4PK2/8/8/8 w - - 0 1",
    "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
];

/// Fixed-depth sweep over a small suite, for quick regression numbers and
/// OpenBench-style node counting.
pub fn bench(depth: i32) -> anyhow::Result<()> {
    let mut total_nodes = 0u64;
    let mut total_time = 0.0f64;

    for (i, fen) in BENCH_FENS.iter().enumerate() {
        let mut engine = Engine::new(EngineConfig::default());
        let mut pos = Position::from_fen(fen)
            .map_err(|e| anyhow::anyhow!("bench position {i} is invalid: {e}"))?;
        let result = engine.search_depth(&mut pos, depth, None, None);
        total_nodes += result.nodes;
        total_time += result.time_seconds;
        let best = result
            .best_move
            .map_or_else(|| "0000".to_string(), |m| m.to_string());
        eprintln!(
            "position {:2}: depth {:2} score {:>7} nodes {:>9} best {best}",
            i + 1,
            result.depth_reached,
            result.score,
            result.nodes,
        );
    }

    let nps = if total_time > 0.0 { total_nodes as f64 / total_time } else { 0.0 };
    println!("{total_nodes} nodes {} nps", nps.round() as u64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::MATE_SCORE;

    #[test]
    fn score_formatting_matches_uci_conventions() {
        assert_eq!(format_score(123), "cp 123");
        assert_eq!(format_score(-50), "cp -50");
        // mate in 1 ply: one full move
        assert_eq!(format_score(MATE_SCORE - 1), "mate 1");
        // mate in 4 plies: two full moves
        assert_eq!(format_score(MATE_SCORE - 4), "mate 2");
        assert_eq!(format_score(-(MATE_SCORE - 3)), "mate -2");
    }

    #[test]
    fn go_parsing_collects_limits() {
        let limits =
            parse_go("go wtime 60000 btime 59000 winc 1000 binc 1000 movestogo 40").unwrap();
        assert_eq!(limits.wtime_ms, 60_000);
        assert_eq!(limits.btime_ms, 59_000);
        assert_eq!(limits.winc_ms, 1000);
        assert_eq!(limits.movestogo, 40);
        assert!(!limits.infinite);

        let limits = parse_go("go depth 9 searchmoves e2e4").unwrap();
        assert_eq!(limits.depth, 9);

        let limits = parse_go("go infinite").unwrap();
        assert!(limits.infinite);
    }

    #[test]
    fn go_parsing_rejects_bad_numbers() {
        assert!(matches!(
            parse_go("go depth notanumber"),
            Err(UciError::ParseGo(_))
        ));
        assert!(matches!(parse_go("go wtime"), Err(UciError::ParseGo(_))));
    }

    #[test]
    fn position_parsing_applies_moves() {
        let mut board = Position::startpos();
        parse_position("position startpos moves e2e4 e7e5 g1f3", &mut board).unwrap();
        assert_eq!(board.turn(), chess::Color::Black);
    }

    #[test]
    fn illegal_move_rejects_the_whole_position_command() {
        let mut board = Position::startpos();
        let key = board.key();
        let res = parse_position("position startpos moves e2e4 e2e4 d7d5", &mut board);
        assert!(matches!(res, Err(UciError::ParseMove(_))));
        assert_eq!(board.key(), key);
    }

    #[test]
    fn bad_fen_leaves_position_unchanged() {
        let mut board = Position::startpos();
        let key = board.key();
        assert!(parse_position("position fen not a real fen", &mut board).is_err());
        assert_eq!(board.key(), key);
    }

    #[test]
    fn setoption_clamps_and_ignores_unknowns() {
        let mut config = EngineConfig::default();
        let engine = Arc::new(Mutex::new(Engine::new(config.clone())));
        handle_setoption(
            "setoption name RazorMarginD2 value 99999",
            &mut config,
            &engine,
        );
        assert_eq!(config.razor_margin_d2, 1000);
        handle_setoption(
            "setoption name NoSuchOption value 42",
            &mut config,
            &engine,
        );
        handle_setoption(
            "setoption name UseNullMovePruning value false",
            &mut config,
            &engine,
        );
        assert!(!config.use_null_move_pruning);
        assert_eq!(
            engine.lock().unwrap().config().razor_margin_d2,
            1000
        );
    }
}
