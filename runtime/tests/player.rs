//! Movie-level playback tests: frame ordering, navigation, and the
//! trace-line contract validators depend on.

use action::{Action, PushValue, Writer};
use movie::{Header, Movie, Rect, Tag};
use runtime::random::Random;
use runtime::Player;

fn do_action(actions: &[Action]) -> Tag {
    let mut writer = Writer::new(6);
    for action in actions {
        writer.action(action).expect("action assembles");
    }
    writer.action(&Action::End).expect("action assembles");
    Tag::DoAction(writer.into_bytes())
}

fn test_movie(tags: Vec<Tag>) -> Movie {
    Movie {
        header: Header {
            version: 6,
            stage: Rect {
                x_min: 0,
                x_max: 11000,
                y_min: 0,
                y_max: 8000,
            },
            frame_rate: 24.0,
            frame_count: 1,
        },
        tags,
    }
}

fn run_seeded(tags: Vec<Tag>, seed: u32) -> String {
    let movie = test_movie(tags);
    let mut player = Player::with_seed(&movie, Vec::new(), seed);
    player.run().expect("movie runs");
    String::from_utf8(player.into_sink()).expect("trace output is UTF-8")
}

fn run_movie(tags: Vec<Tag>) -> String {
    run_seeded(tags, 1)
}

fn trace(text: &str) -> Vec<Action> {
    vec![
        Action::Push(vec![PushValue::Str(text.to_string())]),
        Action::Trace,
    ]
}

fn push_f32(f: f32) -> Action {
    Action::Push(vec![PushValue::F32(f)])
}

fn push_str(s: &str) -> Action {
    Action::Push(vec![PushValue::Str(s.to_string())])
}

#[test]
fn frames_play_in_order_and_the_movie_ends() {
    let out = run_movie(vec![
        do_action(&trace("one")),
        Tag::ShowFrame,
        do_action(&trace("two")),
        Tag::ShowFrame,
        Tag::End,
    ]);
    assert_eq!(out, "one\ntwo\n");
}

#[test]
fn stop_halts_playback() {
    let mut first = trace("one");
    first.push(Action::Stop);
    let out = run_movie(vec![
        do_action(&first),
        Tag::ShowFrame,
        do_action(&trace("never")),
        Tag::ShowFrame,
        Tag::End,
    ]);
    assert_eq!(out, "one\n");
}

#[test]
fn goto_frame_wins_over_the_playing_flag() {
    let mut first = trace("start");
    first.push(Action::GotoFrame(2));
    let out = run_movie(vec![
        do_action(&first),
        Tag::ShowFrame,
        do_action(&trace("skipped")),
        Tag::ShowFrame,
        do_action(&trace("end")),
        Tag::ShowFrame,
        Tag::End,
    ]);
    assert_eq!(out, "start\nend\n");
}

#[test]
fn goto_label_navigates_to_the_labeled_frame() {
    let mut first = trace("start");
    first.push(Action::GotoLabel("outro".to_string()));
    let out = run_movie(vec![
        do_action(&first),
        Tag::ShowFrame,
        do_action(&trace("middle")),
        Tag::ShowFrame,
        Tag::FrameLabel("outro".to_string()),
        do_action(&trace("end")),
        Tag::ShowFrame,
        Tag::End,
    ]);
    assert_eq!(out, "start\nend\n");
}

#[test]
fn goto_frame2_resolves_numbers_and_labels() {
    let mut first = trace("start");
    first.push(push_f32(2.0));
    first.push(Action::GotoFrame2 {
        set_play: true,
        scene_bias: 0,
    });
    let mut second = trace("middle");
    second.push(push_str("outro"));
    second.push(Action::GotoFrame2 {
        set_play: false,
        scene_bias: 0,
    });
    let out = run_movie(vec![
        do_action(&first),
        Tag::ShowFrame,
        do_action(&second),
        Tag::ShowFrame,
        do_action(&trace("skipped")),
        Tag::ShowFrame,
        Tag::FrameLabel("outro".to_string()),
        do_action(&trace("end")),
        Tag::ShowFrame,
        Tag::End,
    ]);
    assert_eq!(out, "start\nmiddle\nend\n");
}

#[test]
fn unknown_labels_are_ignored() {
    let mut first = trace("a");
    first.push(Action::GotoLabel("nope".to_string()));
    let out = run_movie(vec![
        do_action(&first),
        Tag::ShowFrame,
        do_action(&trace("b")),
        Tag::ShowFrame,
        Tag::End,
    ]);
    assert_eq!(out, "a\nb\n");
}

#[test]
fn navigation_loops_terminate_at_the_iteration_cap() {
    let out = run_movie(vec![
        do_action(&[Action::GotoFrame(0)]),
        Tag::ShowFrame,
        Tag::End,
    ]);
    assert_eq!(out, "");
}

#[test]
fn uncaught_throws_report_and_playback_continues() {
    let out = run_movie(vec![
        do_action(&[push_str("boom"), Action::Throw]),
        do_action(&trace("same frame")),
        Tag::ShowFrame,
        do_action(&trace("next frame")),
        Tag::ShowFrame,
        Tag::End,
    ]);
    assert_eq!(out, "[Uncaught exception: boom]\nsame frame\nnext frame\n");
}

#[test]
fn movie_properties_track_the_frame_loop() {
    let current = [
        push_str(""),
        push_f32(4.0),
        Action::GetProperty,
        Action::Trace,
    ];
    let mut first = current.to_vec();
    first.extend([
        push_str(""),
        push_f32(5.0),
        Action::GetProperty,
        Action::Trace,
    ]);
    let out = run_movie(vec![
        do_action(&first),
        Tag::ShowFrame,
        do_action(&current),
        Tag::ShowFrame,
        Tag::End,
    ]);
    // _currentframe is one-based and live; _totalframes counts both frames.
    assert_eq!(out, "1\n2\n2\n");
}

#[test]
fn call_runs_the_target_frame_synchronously() {
    let mut first = vec![push_f32(2.0), Action::Call];
    first.extend(trace("after"));
    let mut sub = trace("sub");
    sub.push(Action::Stop);
    let out = run_movie(vec![
        do_action(&first),
        Tag::ShowFrame,
        do_action(&sub),
        Tag::ShowFrame,
        Tag::End,
    ]);
    // Frame 2's script runs inline during frame 1; its Stop then ends playback.
    assert_eq!(out, "sub\nafter\n");
}

#[test]
fn wait_for_frame_never_skips_when_headless() {
    let mut actions = vec![Action::WaitForFrame {
        frame: 1,
        skip_count: 2,
    }];
    actions.extend(trace("ran"));
    let out = run_movie(vec![do_action(&actions), Tag::ShowFrame, Tag::End]);
    assert_eq!(out, "ran\n");
}

#[test]
fn seeded_runs_reproduce_random_sequences() {
    let tags = || {
        vec![
            do_action(&[push_f32(100.0), Action::RandomNumber, Action::Trace]),
            Tag::ShowFrame,
            Tag::End,
        ]
    };
    let first = run_seeded(tags(), 9);
    let second = run_seeded(tags(), 9);
    assert_eq!(first, second);
    let mut rng = Random::new(9);
    let expected = rng.next_below(100);
    assert_eq!(first, format!("{expected}\n"));
}

#[test]
fn float_traces_match_the_validator_tolerance() {
    let out = run_movie(vec![
        do_action(&[push_f32(1.0), push_f32(3.0), Action::Divide, Action::Trace]),
        Tag::ShowFrame,
        Tag::End,
    ]);
    let actual: f64 = out.trim().parse().expect("trace line is a number");
    let expected = 1.0f64 / 3.0;
    assert!((actual - expected).abs() / expected.abs() < 1e-5);
}

#[test]
fn movies_parse_and_play_from_raw_bytes() {
    // FWS header, 15-bit RECT (0..11000, 0..8000), 24 fps, 1 frame.
    let mut body = vec![0x78, 0x00, 0x05, 0x5F, 0x00, 0x00, 0x0F, 0xA0, 0x00];
    body.extend_from_slice(&[0x00, 0x18]);
    body.extend_from_slice(&[0x01, 0x00]);

    let Tag::DoAction(script) = do_action(&trace("hi")) else {
        unreachable!();
    };
    body.extend_from_slice(&((12u16 << 6) | script.len() as u16).to_le_bytes());
    body.extend_from_slice(&script);
    body.extend_from_slice(&(1u16 << 6).to_le_bytes()); // ShowFrame
    body.extend_from_slice(&[0x00, 0x00]); // End

    let mut bytes = b"FWS\x06".to_vec();
    bytes.extend_from_slice(&(8 + body.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&body);

    let movie = Movie::read(&bytes).expect("movie parses");
    let mut player = Player::with_seed(&movie, Vec::new(), 1);
    player.run().expect("movie runs");
    assert_eq!(player.into_sink(), b"hi\n");
}
