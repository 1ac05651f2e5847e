use coppernet::board::{Board, Flags};
use coppernet::geom::Point;
use coppernet::netlist::NetMenu;
use coppernet::rats::{add_all_rats, collect_subnets};
use coppernet::scan::{lookup_connection, ScanContext};
use coppernet::NullObserver;

fn init() {
    let _ = env_logger::try_init();
}

/// Three parts of one net: two already wired, the third floating.
fn partly_wired() -> Board {
    let mut board = Board::new(2);
    for (name, x) in &[("U1", 0.0), ("U2", 100.0), ("U3", 200.0)] {
        let elem = board.add_element(*name);
        board.add_pad(
            elem,
            Point::new(*x, 0.0),
            Point::new(*x + 4.0, 0.0),
            2.0,
            1.0,
            "1",
            Flags::empty(),
        );
    }
    board.add_line(
        0,
        Point::new(0.0, 0.0),
        Point::new(100.0, 0.0),
        2.0,
        1.0,
        Flags::empty(),
    );
    board
        .netlist
        .add(NetMenu::new("GND").entry("U1-1").entry("U2-1").entry("U3-1"));
    board
}

#[test]
fn only_the_floating_part_gets_a_rat() {
    init();
    let mut board = partly_wired();
    let changed = add_all_rats(&mut board, false, None, &mut NullObserver).unwrap();
    assert!(changed);
    assert_eq!(board.rats.len(), 1);
    // the bridge springs from the closest existing copper
    let rat = &board.rats[0];
    let ends = [rat.p1, rat.p2];
    assert!(ends.contains(&Point::new(200.0, 0.0)));
}

#[test]
fn rats_complete_the_net_for_the_scanner() {
    init();
    let mut board = partly_wired();
    add_all_rats(&mut board, false, None, &mut NullObserver).unwrap();

    // with the rat in place the whole net hangs together
    assert!(lookup_connection(
        &mut board,
        1.0,
        0.0,
        1.0,
        Flags::FOUND,
        true,
        &mut NullObserver
    ));
    let u3_pad = board
        .all_pads()
        .find(|r| match r {
            coppernet::ObjectRef::Pad { element, .. } => board.elements[*element].name == "U3",
            _ => false,
        })
        .unwrap();
    assert!(board.test_flag(u3_pad, Flags::FOUND));
}

#[test]
fn rerunning_adds_nothing_new() {
    init();
    let mut board = partly_wired();
    let first = add_all_rats(&mut board, false, None, &mut NullObserver).unwrap();
    assert!(first);
    assert_eq!(board.rats.len(), 1);
    let second = add_all_rats(&mut board, false, None, &mut NullObserver).unwrap();
    assert!(!second);
    assert_eq!(board.rats.len(), 1);
}

#[test]
fn three_islands_need_two_rats() {
    init();
    let mut board = Board::new(2);
    // three terminals of one net with no copper between any of them
    for (name, x) in &[("U1", 0.0), ("U2", 100.0), ("U3", 200.0)] {
        let elem = board.add_element(*name);
        board.add_pad(
            elem,
            Point::new(*x, 0.0),
            Point::new(*x + 4.0, 0.0),
            2.0,
            1.0,
            "1",
            Flags::empty(),
        );
    }
    board
        .netlist
        .add(NetMenu::new("GND").entry("U1-1").entry("U2-1").entry("U3-1"));

    let subnets = collect_subnets(&mut board, false).unwrap();
    assert_eq!(subnets.len(), 1);
    assert_eq!(subnets[0].len(), 3);
    // grouping moves terminals around but never loses one
    let total: usize = subnets[0].iter().map(|n| n.connections.len()).sum();
    assert_eq!(total, 3);

    add_all_rats(&mut board, false, None, &mut NullObserver).unwrap();
    assert_eq!(board.rats.len(), 2);

    // the rats make the whole net reachable from one end
    assert!(lookup_connection(
        &mut board,
        1.0,
        0.0,
        1.0,
        Flags::FOUND,
        true,
        &mut NullObserver
    ));
    for r in board.all_pads().collect::<Vec<_>>() {
        assert!(board.test_flag(r, Flags::FOUND), "{:?} left unwired", r);
    }
}

#[test]
fn independent_nets_are_kept_apart() {
    init();
    let mut board = Board::new(2);
    for (name, x, y) in &[
        ("U1", 0.0, 0.0),
        ("U2", 100.0, 0.0),
        ("U3", 0.0, 100.0),
        ("U4", 100.0, 100.0),
    ] {
        let elem = board.add_element(*name);
        board.add_pad(
            elem,
            Point::new(*x, *y),
            Point::new(*x + 4.0, *y),
            2.0,
            1.0,
            "1",
            Flags::empty(),
        );
    }
    board
        .netlist
        .add(NetMenu::new("GND").entry("U1-1").entry("U2-1"));
    board
        .netlist
        .add(NetMenu::new("VCC").entry("U3-1").entry("U4-1"));
    add_all_rats(&mut board, false, None, &mut NullObserver).unwrap();
    assert_eq!(board.rats.len(), 2);
    for rat in &board.rats {
        // every rat stays horizontal: no bridge between the two nets
        assert_eq!(rat.p1.y, rat.p2.y);
    }
}

#[test]
fn selected_only_limits_the_work() {
    init();
    let mut board = partly_wired();
    // nothing selected, nothing drawn
    let changed = add_all_rats(&mut board, true, None, &mut NullObserver).unwrap();
    assert!(!changed);
    assert!(board.rats.is_empty());
}

#[test]
fn scan_idempotence_with_rats_present() {
    init();
    let mut board = partly_wired();
    add_all_rats(&mut board, false, None, &mut NullObserver).unwrap();

    let mut ctx = ScanContext::new(&board);
    let seed = board.all_pads().next().unwrap();
    ctx.list_start(&mut board, seed);
    ctx.find_connections(&mut board, true, &mut NullObserver);
    let first: Vec<bool> = board
        .all_copper()
        .chain(board.all_rats())
        .map(|r| board.test_flag(r, Flags::FOUND))
        .collect();

    ctx.list_start(&mut board, seed);
    ctx.find_connections(&mut board, true, &mut NullObserver);
    let second: Vec<bool> = board
        .all_copper()
        .chain(board.all_rats())
        .map(|r| board.test_flag(r, Flags::FOUND))
        .collect();
    assert_eq!(first, second);
}
