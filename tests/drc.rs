use coppernet::board::{Board, Flags, ObjectKind};
use coppernet::drc::{check_all, DrcHandler, DrcParams, Violation};
use coppernet::geom::Point;

fn init() {
    let _ = env_logger::try_init();
}

#[derive(Default)]
struct Collect {
    violations: Vec<Violation>,
}

impl DrcHandler for Collect {
    fn violation(&mut self, _board: &Board, violation: &Violation) {
        self.violations.push(violation.clone());
    }
}

fn rules() -> DrcParams {
    DrcParams {
        bloat: 0.5,
        shrink: 0.25,
        min_width: 1.0,
        min_silk: 1.0,
        min_drill: 1.0,
        min_ring: 0.25,
    }
}

/// Pin, trace and via of one healthy net.
fn wired_net(board: &mut Board) {
    let elem = board.add_element("U1");
    board.add_pin(
        elem,
        Point::new(0.0, 0.0),
        8.0,
        2.0,
        3.0,
        "1",
        Flags::empty(),
    );
    board.add_line(
        0,
        Point::new(0.0, 0.0),
        Point::new(50.0, 0.0),
        4.0,
        2.0,
        Flags::CLEARLINE,
    );
    board.add_via(Point::new(50.0, 0.0), 10.0, 2.0, 4.0, Flags::empty());
}

#[test]
fn healthy_board_passes() {
    init();
    let mut board = Board::new(2);
    wired_net(&mut board);
    let mut handler = Collect::default();
    assert_eq!(check_all(&mut board, &rules(), &mut handler).unwrap(), 0);
}

#[test]
fn tight_polygon_clearance_names_the_line() {
    init();
    let mut board = Board::new(2);
    let elem = board.add_element("U1");
    board.add_pin(
        elem,
        Point::new(0.0, 0.0),
        8.0,
        2.0,
        3.0,
        "1",
        Flags::empty(),
    );
    let line = board.add_line(
        0,
        Point::new(0.0, 0.0),
        Point::new(50.0, 0.0),
        4.0,
        0.8,
        Flags::CLEARLINE,
    );
    board.add_via(Point::new(50.0, 0.0), 10.0, 2.0, 4.0, Flags::empty());

    let mut handler = Collect::default();
    let count = check_all(&mut board, &rules(), &mut handler).unwrap();
    assert_eq!(count, 1);
    let v = &handler.violations[0];
    assert_eq!(v.title, "insufficient clearance");
    assert_eq!(v.measured, Some(0.8));
    assert_eq!(v.required, Some(1.0));
    assert_eq!(v.objects, vec![(board.id_of(line), ObjectKind::Line)]);
}

#[test]
fn thin_trace_reports_both_values() {
    init();
    let mut board = Board::new(2);
    wired_net(&mut board);
    board.add_line(
        0,
        Point::new(0.0, 20.0),
        Point::new(50.0, 20.0),
        0.4,
        2.0,
        Flags::empty(),
    );
    let mut handler = Collect::default();
    let count = check_all(&mut board, &rules(), &mut handler).unwrap();
    assert_eq!(count, 1);
    let v = &handler.violations[0];
    assert_eq!(v.title, "line width is too thin");
    assert_eq!(v.measured, Some(0.4));
    assert_eq!(v.required, Some(1.0));
}

#[test]
fn one_bad_board_many_rules() {
    init();
    let mut board = Board::new(2);
    wired_net(&mut board);
    // thin arc
    board.add_arc(
        0,
        Point::new(0.0, 30.0),
        10.0,
        0.0,
        90.0,
        0.5,
        2.0,
        Flags::empty(),
    );
    // undersized drill and ring at once
    board.add_via(Point::new(100.0, 100.0), 1.2, 2.0, 0.9, Flags::empty());
    // thin free silk
    board.add_silk_line(Point::new(0.0, 50.0), Point::new(10.0, 50.0), 0.3);

    let mut handler = Collect::default();
    let count = check_all(&mut board, &rules(), &mut handler).unwrap();
    assert_eq!(count, 4);
    let titles: Vec<&str> = handler
        .violations
        .iter()
        .map(|v| v.title.as_str())
        .collect();
    assert!(titles.contains(&"arc width is too thin"));
    assert!(titles.contains(&"annular ring too small"));
    assert!(titles.contains(&"drill size is too small"));
    assert!(titles.contains(&"silk line is too thin"));
}

#[test]
fn crossing_nets_within_spacing_are_caught() {
    init();
    let mut board = Board::new(2);
    board.add_via(Point::new(0.0, 0.0), 4.0, 2.0, 2.0, Flags::empty());
    board.add_line(
        0,
        Point::new(0.0, 0.0),
        Point::new(30.0, 0.0),
        4.0,
        2.0,
        Flags::empty(),
    );
    // a second net passing 0.4 from the first trace's surface
    board.add_via(Point::new(0.0, 4.4), 4.0, 2.0, 2.0, Flags::empty());
    board.add_line(
        0,
        Point::new(0.0, 4.4),
        Point::new(30.0, 4.4),
        4.0,
        2.0,
        Flags::empty(),
    );
    let mut handler = Collect::default();
    let count = check_all(&mut board, &rules(), &mut handler).unwrap();
    // each net sees the other encroaching
    assert_eq!(count, 2);
    for v in &handler.violations {
        assert_eq!(v.title, "copper areas too close");
    }
}

#[test]
fn scratch_flags_never_leak() {
    init();
    let mut board = Board::new(2);
    wired_net(&mut board);
    board.add_line(
        0,
        Point::new(0.0, 20.0),
        Point::new(50.0, 20.0),
        0.4,
        2.0,
        Flags::empty(),
    );
    let mut handler = Collect::default();
    check_all(&mut board, &rules(), &mut handler).unwrap();
    let refs: Vec<_> = board.all_copper().chain(board.all_rats()).collect();
    for r in refs {
        assert!(
            !board.test_flag(r, Flags::FOUND | Flags::DRC | Flags::SELECTED),
            "{:?} kept a scratch flag",
            r
        );
    }
}
