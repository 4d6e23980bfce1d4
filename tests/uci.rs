//! Black-box tests of the UCI protocol surface: the engine binary is driven
//! through stdin and judged on its stdout, the way a GUI would see it.

use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;

fn engine() -> Command {
    let mut cmd = Command::cargo_bin("sable").expect("binary exists");
    cmd.timeout(Duration::from_secs(60));
    cmd
}

#[test]
fn handshake_advertises_identity_and_options() {
    engine()
        .write_stdin("uci\nisready\nquit\n")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("id name Sable")
                .and(predicate::str::contains("uciok"))
                .and(predicate::str::contains("readyok"))
                .and(predicate::str::contains("option name Hash type spin"))
                .and(predicate::str::contains("option name MoveOverhead type spin"))
                .and(predicate::str::contains("option name UseNullMovePruning type check")),
        );
}

#[test]
fn depth_one_from_startpos_emits_a_legal_bestmove() {
    let legal = [
        "a2a3", "a2a4", "b2b3", "b2b4", "c2c3", "c2c4", "d2d3", "d2d4", "e2e3", "e2e4",
        "f2f3", "f2f4", "g2g3", "g2g4", "h2h3", "h2h4", "b1a3", "b1c3", "g1f3", "g1h3",
    ];
    let pattern = format!("bestmove ({})", legal.join("|"));
    engine()
        .write_stdin("uci\nisready\nposition startpos\ngo depth 1\n")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("info depth 1")
                .and(predicate::str::is_match(pattern).unwrap()),
        );
}

#[test]
fn mate_in_one_is_reported_as_mate_one() {
    engine()
        .write_stdin("position fen 6k1/5ppp/8/8/8/8/8/R6K w - - 0 1\ngo depth 3\n")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("score mate 1")
                .and(predicate::str::contains("bestmove a1a8")),
        );
}

#[test]
fn stalemated_side_gets_the_null_move() {
    engine()
        .write_stdin("position fen 7k/5Q2/6K1/8/8/8/8/8 b - - 0 1\ngo depth 1\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("bestmove 0000"));
}

#[test]
fn clock_search_answers_quickly() {
    // a 1s clock budgets well under 100ms for the move
    engine()
        .write_stdin("position startpos\ngo wtime 1000 btime 1000\n")
        .assert()
        .success()
        .stdout(predicate::str::is_match("bestmove [a-h][1-8][a-h][1-8]").unwrap());
}

#[test]
fn stop_interrupts_an_infinite_search() {
    engine()
        .write_stdin("position startpos\ngo infinite\nstop\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::is_match("bestmove [a-h][1-8][a-h][1-8]").unwrap());
}

#[test]
fn unknown_options_are_ignored_and_values_clamped() {
    engine()
        .write_stdin(
            "uci\nsetoption name NoSuchKnob value 9\nsetoption name Hash value 0\n\
             setoption name RazorMarginD2 value 99999\n\
             isready\nposition startpos\ngo depth 1\n",
        )
        .assert()
        .success()
        .stdout(
            predicate::str::contains("readyok")
                .and(predicate::str::is_match("bestmove [a-h][1-8][a-h][1-8]").unwrap()),
        );
}

#[test]
fn ucinewgame_resets_cleanly_between_searches() {
    // "stop" joins the first search synchronously, so both searches are
    // guaranteed to report
    engine()
        .write_stdin(
            "uci\nucinewgame\nposition startpos moves e2e4 e7e5\ngo depth 3\nstop\n\
             ucinewgame\nposition startpos\ngo depth 3\n",
        )
        .assert()
        .success()
        .stdout(predicate::str::is_match("(?s)bestmove .*bestmove ").unwrap());
}

#[test]
fn invalid_fen_is_rejected_but_engine_keeps_running() {
    engine()
        .write_stdin("position fen garbage\nposition startpos\ngo depth 1\n")
        .assert()
        .success()
        .stdout(predicate::str::is_match("bestmove [a-h][1-8][a-h][1-8]").unwrap())
        .stderr(predicate::str::contains("ParseFen"));
}
