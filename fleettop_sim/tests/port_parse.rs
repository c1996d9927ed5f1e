//! Port flag parsing for the sim binary.

use fleettop_sim::cli::parse_port;

fn argv(args: &[&str]) -> Vec<String> {
    std::iter::once("fleettop_sim")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

#[test]
fn test_default_when_absent() {
    assert_eq!(parse_port(argv(&[]), 50051), 50051);
}

#[test]
fn test_long_flag() {
    assert_eq!(parse_port(argv(&["--port", "6000"]), 50051), 6000);
}

#[test]
fn test_short_flag() {
    assert_eq!(parse_port(argv(&["-p", "7000"]), 50051), 7000);
}

#[test]
fn test_equals_form() {
    assert_eq!(parse_port(argv(&["--port=8080"]), 50051), 8080);
}

#[test]
fn test_long_flag_wins_over_short() {
    assert_eq!(parse_port(argv(&["-p", "7000", "--port", "6000"]), 50051), 6000);
}

#[test]
fn test_invalid_value_falls_back_to_default() {
    assert_eq!(parse_port(argv(&["--port", "banana"]), 50051), 50051);
    assert_eq!(parse_port(argv(&["--port", "70000"]), 50051), 50051);
}
