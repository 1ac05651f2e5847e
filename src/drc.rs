//! The design rule checker.  Net isolation is checked with the scanner
//! run at a signed bloat: a negative bloat finds copper that only barely
//! hangs together, a positive one finds foreign copper that sits too
//! close.  Width, ring, drill and silk rules are plain measurements.

use crate::board::{Board, Flags, ObjectKind, ObjectRef};
use crate::geom::Point;
use crate::scan::{reset_connections, NullObserver, ScanContext};
use failure::Fallible;
use log::debug;

/// The rule set.  All values are board units; the defaults mirror the
/// classic mil-scale rules.
#[derive(Clone, Copy, Debug)]
pub struct DrcParams {
    /// Minimum spacing between copper of different nets.
    pub bloat: f64,
    /// Minimum overlap depth between copper of the same net.
    pub shrink: f64,
    pub min_width: f64,
    pub min_silk: f64,
    pub min_drill: f64,
    pub min_ring: f64,
}

impl Default for DrcParams {
    fn default() -> DrcParams {
        DrcParams {
            bloat: 10.0,
            shrink: 10.0,
            min_width: 10.0,
            min_silk: 10.0,
            min_drill: 25.0,
            min_ring: 10.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Violation {
    pub title: String,
    pub explanation: String,
    pub location: Point,
    pub measured: Option<f64>,
    pub required: Option<f64>,
    /// Offending objects by id, for highlighting.
    pub objects: Vec<(u64, ObjectKind)>,
}

/// Receives violations as they are found.  `continue_checking` is asked
/// after every report; answering false aborts the run.
pub trait DrcHandler {
    fn violation(&mut self, board: &Board, violation: &Violation);

    fn continue_checking(&mut self) -> bool {
        true
    }
}

struct Checker {
    params: DrcParams,
    count: usize,
    aborted: bool,
}

impl Checker {
    fn report(&mut self, board: &Board, handler: &mut dyn DrcHandler, violation: Violation) {
        self.count += 1;
        handler.violation(board, &violation);
        if !handler.continue_checking() {
            self.aborted = true;
        }
    }

    fn object_violation(
        &mut self,
        board: &Board,
        handler: &mut dyn DrcHandler,
        r: ObjectRef,
        title: &str,
        explanation: &str,
        measured: f64,
        required: f64,
    ) {
        self.report(
            board,
            handler,
            Violation {
                title: title.to_string(),
                explanation: explanation.to_string(),
                location: board.position_of(r),
                measured: Some(measured),
                required: Some(required),
                objects: vec![(board.id_of(r), r.kind())],
            },
        );
    }

    /// The per-net check.  The shrink pass paints the net that stays
    /// connected when every surface loses `shrink` of margin; anything
    /// the zero-bloat scan reaches beyond that is barely attached, and
    /// anything the bloated scan reaches belongs to another net that
    /// sits within `bloat`.
    fn check_net(
        &mut self,
        ctx: &mut ScanContext,
        board: &mut Board,
        seed: ObjectRef,
        handler: &mut dyn DrcHandler,
    ) {
        let mut observer = NullObserver;

        ctx.flag = Flags::DRC | Flags::SELECTED;
        ctx.bloat = -self.params.shrink;
        ctx.drc = false;
        ctx.list_start(board, seed);
        ctx.find_connections(board, true, &mut observer);

        ctx.dump_list();
        ctx.flag = Flags::FOUND;
        ctx.bloat = 0.0;
        ctx.drc = true;
        ctx.list_start(board, seed);
        while ctx.find_connections(board, true, &mut observer) {
            let thing = match ctx.thing() {
                Some(t) => t,
                None => break,
            };
            self.report(
                board,
                handler,
                Violation {
                    title: "potential for broken trace".to_string(),
                    explanation: "copper connected at full size is no longer \
                                  connected when surfaces shrink by the minimum \
                                  overlap; it hangs on a sliver"
                        .to_string(),
                    location: board.position_of(thing),
                    measured: None,
                    required: Some(self.params.shrink),
                    objects: vec![(board.id_of(thing), thing.kind())],
                },
            );
            if self.aborted {
                return;
            }
            // absorb the marginal branch so the next round moves past it
            board.set_flag(thing, Flags::SELECTED);
            ctx.drc = false;
            ctx.flag = Flags::SELECTED;
            ctx.bloat = -self.params.shrink;
            ctx.list_start(board, thing);
            ctx.find_connections(board, true, &mut observer);
            ctx.dump_list();
            ctx.flag = Flags::FOUND;
            ctx.bloat = 0.0;
            ctx.drc = true;
            ctx.list_start(board, seed);
        }

        // the bloated pass keeps the SELECTED paint from the shrink pass
        // as the reference net and only re-traces FOUND
        ctx.drc = false;
        ctx.dump_list();
        reset_connections(board, Flags::FOUND, &mut observer);
        ctx.flag = Flags::FOUND;
        ctx.bloat = self.params.bloat;
        ctx.drc = true;
        ctx.list_start(board, seed);
        while ctx.find_connections(board, true, &mut observer) {
            let thing = match ctx.thing() {
                Some(t) => t,
                None => break,
            };
            self.report(
                board,
                handler,
                Violation {
                    title: "copper areas too close".to_string(),
                    explanation: "copper of another net sits closer than the \
                                  minimum spacing"
                        .to_string(),
                    location: board.position_of(thing),
                    measured: None,
                    required: Some(self.params.bloat),
                    objects: vec![(board.id_of(thing), thing.kind())],
                },
            );
            if self.aborted {
                return;
            }
            // paint the encroaching net so it is reported only once
            ctx.drc = false;
            ctx.flag = Flags::FOUND | Flags::SELECTED;
            ctx.bloat = 0.0;
            ctx.list_start(board, thing);
            ctx.find_connections(board, true, &mut observer);
            ctx.dump_list();
            ctx.flag = Flags::FOUND;
            ctx.bloat = self.params.bloat;
            ctx.drc = true;
            ctx.list_start(board, seed);
        }
        ctx.drc = false;
        ctx.dump_list();
    }

    /// Objects that carve their clearance out of polygons need enough of
    /// it to satisfy the spacing rule from both sides.
    fn check_clearances(&mut self, board: &mut Board, handler: &mut dyn DrcHandler) {
        let required = 2.0 * self.params.bloat;
        let refs: Vec<ObjectRef> = board.all_copper().collect();
        for r in refs {
            if self.aborted {
                return;
            }
            let clearance = match r {
                ObjectRef::Line { .. } => {
                    let line = board.line(r);
                    if !line.flags.contains(Flags::CLEARLINE) {
                        continue;
                    }
                    line.clearance
                }
                ObjectRef::Arc { .. } => {
                    let arc = board.arc(r);
                    if !arc.flags.contains(Flags::CLEARLINE) {
                        continue;
                    }
                    arc.clearance
                }
                ObjectRef::Via(_) | ObjectRef::Pin { .. } => {
                    let pv = board.pv(r);
                    if pv.flags.contains(Flags::HOLE) {
                        continue;
                    }
                    pv.clearance
                }
                ObjectRef::Pad { .. } => board.pad(r).clearance,
                _ => continue,
            };
            if clearance > 0.0 && clearance <= required {
                self.object_violation(
                    board,
                    handler,
                    r,
                    "insufficient clearance",
                    "the gap this object keeps from surrounding polygons is \
                     smaller than twice the minimum spacing",
                    clearance,
                    required,
                );
            }
        }
    }

    fn check_widths(&mut self, board: &mut Board, handler: &mut dyn DrcHandler) {
        let refs: Vec<ObjectRef> = board.all_copper().collect();
        for r in refs {
            if self.aborted {
                return;
            }
            match r {
                ObjectRef::Line { .. } => {
                    let thickness = board.line(r).thickness;
                    if thickness < self.params.min_width {
                        self.object_violation(
                            board,
                            handler,
                            r,
                            "line width is too thin",
                            "the line is thinner than the minimum copper width",
                            thickness,
                            self.params.min_width,
                        );
                    }
                }
                ObjectRef::Arc { .. } => {
                    let thickness = board.arc(r).thickness;
                    if thickness < self.params.min_width {
                        self.object_violation(
                            board,
                            handler,
                            r,
                            "arc width is too thin",
                            "the arc is thinner than the minimum copper width",
                            thickness,
                            self.params.min_width,
                        );
                    }
                }
                ObjectRef::Pad { .. } => {
                    let thickness = board.pad(r).thickness;
                    if thickness < self.params.min_width {
                        self.object_violation(
                            board,
                            handler,
                            r,
                            "pad is too thin",
                            "the pad is thinner than the minimum copper width",
                            thickness,
                            self.params.min_width,
                        );
                    }
                }
                ObjectRef::Via(_) | ObjectRef::Pin { .. } => {
                    let (thickness, drill, hole) = {
                        let pv = board.pv(r);
                        (pv.thickness, pv.drill, pv.flags.contains(Flags::HOLE))
                    };
                    if !hole {
                        let ring = (thickness - drill) * 0.5;
                        if ring < self.params.min_ring {
                            self.object_violation(
                                board,
                                handler,
                                r,
                                "annular ring too small",
                                "not enough copper is left around the drilled hole",
                                ring,
                                self.params.min_ring,
                            );
                        }
                    }
                    if drill < self.params.min_drill {
                        self.object_violation(
                            board,
                            handler,
                            r,
                            "drill size is too small",
                            "the hole diameter is below the smallest drill",
                            drill,
                            self.params.min_drill,
                        );
                    }
                }
                _ => {}
            }
            if self.aborted {
                return;
            }
        }
    }

    fn check_silk(&mut self, board: &mut Board, handler: &mut dyn DrcHandler) {
        for i in 0..board.silk.len() {
            if self.aborted {
                return;
            }
            let line = board.silk[i].clone();
            if line.thickness < self.params.min_silk {
                self.report(
                    board,
                    handler,
                    Violation {
                        title: "silk line is too thin".to_string(),
                        explanation: "the silkscreen line is thinner than the \
                                      minimum silk width"
                            .to_string(),
                        location: Point::new(
                            (line.p1.x + line.p2.x) * 0.5,
                            (line.p1.y + line.p2.y) * 0.5,
                        ),
                        measured: Some(line.thickness),
                        required: Some(self.params.min_silk),
                        objects: vec![(line.id, ObjectKind::Line)],
                    },
                );
            }
        }
        // element silk is summarized per element; a footprint outline can
        // hold dozens of offending strokes
        for e in 0..board.elements.len() {
            if self.aborted {
                return;
            }
            let (name, offenders, thinnest, at) = {
                let elem = &board.elements[e];
                let mut thinnest = None;
                let mut at = None;
                let mut offenders = 0;
                for line in &elem.silk {
                    if line.thickness < self.params.min_silk {
                        offenders += 1;
                        if thinnest.map_or(true, |t| line.thickness < t) {
                            thinnest = Some(line.thickness);
                            at = Some(Point::new(
                                (line.p1.x + line.p2.x) * 0.5,
                                (line.p1.y + line.p2.y) * 0.5,
                            ));
                        }
                    }
                }
                (elem.name.clone(), offenders, thinnest, at)
            };
            if offenders > 0 {
                self.report(
                    board,
                    handler,
                    Violation {
                        title: format!(
                            "element {} has {} silk lines which are too thin",
                            name, offenders
                        ),
                        explanation: "the element's silkscreen contains strokes \
                                      thinner than the minimum silk width"
                            .to_string(),
                        location: at.unwrap_or_else(|| Point::new(0.0, 0.0)),
                        measured: thinnest,
                        required: Some(self.params.min_silk),
                        objects: Vec::new(),
                    },
                );
            }
        }
    }
}

/// Runs every rule over the whole board and returns the violation count.
/// The scratch flags are cleared again before returning, whether the run
/// completed or the handler aborted it.
pub fn check_all(
    board: &mut Board,
    params: &DrcParams,
    handler: &mut dyn DrcHandler,
) -> Fallible<usize> {
    board.refresh_no_drc();
    let mut observer = NullObserver;
    reset_connections(
        board,
        Flags::FOUND | Flags::DRC | Flags::SELECTED,
        &mut observer,
    );

    let mut checker = Checker {
        params: *params,
        count: 0,
        aborted: false,
    };

    let mut seeds: Vec<ObjectRef> = Vec::new();
    for (e, elem) in board.elements.iter().enumerate() {
        for i in 0..elem.pins.len() {
            seeds.push(ObjectRef::Pin { element: e, pin: i });
        }
        for i in 0..elem.pads.len() {
            seeds.push(ObjectRef::Pad { element: e, pad: i });
        }
    }
    seeds.extend((0..board.vias.len()).map(ObjectRef::Via));

    let mut ctx = ScanContext::new(board);
    for seed in seeds {
        if checker.aborted {
            break;
        }
        // a seed that already carries DRC sits on a net checked earlier
        if board.test_flag(seed, Flags::DRC) {
            continue;
        }
        debug!("rule check from {:?}", seed);
        checker.check_net(&mut ctx, board, seed, handler);
        reset_connections(board, Flags::FOUND | Flags::SELECTED, &mut observer);
    }

    if !checker.aborted {
        checker.check_clearances(board, handler);
    }
    if !checker.aborted {
        checker.check_widths(board, handler);
    }
    if !checker.aborted {
        checker.check_silk(board, handler);
    }

    reset_connections(
        board,
        Flags::FOUND | Flags::DRC | Flags::SELECTED,
        &mut observer,
    );
    Ok(checker.count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        violations: Vec<Violation>,
        abort_after: Option<usize>,
    }

    impl DrcHandler for Collect {
        fn violation(&mut self, _board: &Board, violation: &Violation) {
            self.violations.push(violation.clone());
        }

        fn continue_checking(&mut self) -> bool {
            match self.abort_after {
                Some(n) => self.violations.len() < n,
                None => true,
            }
        }
    }

    fn relaxed() -> DrcParams {
        // rules that a plain test board satisfies
        DrcParams {
            bloat: 0.1,
            shrink: 0.1,
            min_width: 0.5,
            min_silk: 0.5,
            min_drill: 0.5,
            min_ring: 0.1,
        }
    }

    #[test]
    fn clean_board_has_no_violations() {
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
        board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        board.add_via(Point::new(50.0, 0.0), 10.0, 2.0, 4.0, Flags::empty());
        let mut handler = Collect::default();
        let count = check_all(&mut board, &relaxed(), &mut handler).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn thin_line_is_measured_against_the_rule() {
        let mut board = Board::new(2);
        let line = board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            0.2,
            2.0,
            Flags::empty(),
        );
        let mut params = relaxed();
        params.min_width = 0.5;
        let mut handler = Collect::default();
        let count = check_all(&mut board, &params, &mut handler).unwrap();
        assert_eq!(count, 1);
        let v = &handler.violations[0];
        assert_eq!(v.title, "line width is too thin");
        assert_eq!(v.measured, Some(0.2));
        assert_eq!(v.required, Some(0.5));
        assert_eq!(v.objects, vec![(board.id_of(line), ObjectKind::Line)]);
    }

    #[test]
    fn clearing_line_with_tight_clearance() {
        let mut board = Board::new(2);
        let elem = board.add_element("U1");
        board.add_pin(
            elem,
            Point::new(0.0, 0.0),
            8.0,
            5.0,
            3.0,
            "1",
            Flags::empty(),
        );
        let line = board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            4.0,
            0.15,
            Flags::CLEARLINE,
        );
        board.add_via(Point::new(50.0, 0.0), 10.0, 5.0, 4.0, Flags::empty());
        let mut handler = Collect::default();
        let count = check_all(&mut board, &relaxed(), &mut handler).unwrap();
        assert_eq!(count, 1);
        let v = &handler.violations[0];
        assert_eq!(v.title, "insufficient clearance");
        assert_eq!(v.objects[0].0, board.id_of(line));
    }

    #[test]
    fn copper_too_close_is_reported_once() {
        let mut board = Board::new(2);
        board.add_via(Point::new(0.0, 0.0), 2.0, 5.0, 1.0, Flags::empty());
        board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            2.0,
            5.0,
            Flags::empty(),
        );
        // a foreign trace 0.5 away from the first net's surface
        board.add_line(
            0,
            Point::new(12.5, 0.0),
            Point::new(20.0, 0.0),
            2.0,
            5.0,
            Flags::empty(),
        );
        let mut params = relaxed();
        params.bloat = 1.0;
        params.min_drill = 0.5;
        params.min_ring = 0.1;
        let mut handler = Collect::default();
        let count = check_all(&mut board, &params, &mut handler).unwrap();
        assert_eq!(count, 1);
        assert_eq!(handler.violations[0].title, "copper areas too close");
    }

    #[test]
    fn sliver_connection_is_a_broken_trace_risk() {
        let mut board = Board::new(2);
        board.add_via(Point::new(0.0, 0.0), 2.0, 5.0, 1.0, Flags::empty());
        board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            2.0,
            5.0,
            Flags::empty(),
        );
        // overlaps the first line by only 0.5
        board.add_line(
            0,
            Point::new(11.5, 0.0),
            Point::new(20.0, 0.0),
            2.0,
            5.0,
            Flags::empty(),
        );
        let mut params = relaxed();
        params.shrink = 1.0;
        params.bloat = 0.0;
        let mut handler = Collect::default();
        let count = check_all(&mut board, &params, &mut handler).unwrap();
        assert_eq!(count, 1);
        assert_eq!(handler.violations[0].title, "potential for broken trace");
    }

    #[test]
    fn annular_ring_and_drill_rules() {
        let mut board = Board::new(2);
        let via = board.add_via(Point::new(0.0, 0.0), 10.0, 5.0, 9.9, Flags::empty());
        let mut params = relaxed();
        params.min_ring = 1.0;
        params.min_drill = 12.0;
        let mut handler = Collect::default();
        let count = check_all(&mut board, &params, &mut handler).unwrap();
        assert_eq!(count, 2);
        let titles: Vec<&str> = handler.violations.iter().map(|v| v.title.as_str()).collect();
        assert!(titles.contains(&"annular ring too small"));
        assert!(titles.contains(&"drill size is too small"));
        assert_eq!(handler.violations[0].objects[0].0, board.id_of(via));
    }

    #[test]
    fn element_silk_is_aggregated() {
        let mut board = Board::new(2);
        board.add_silk_line(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 0.2);
        let elem = board.add_element("U1");
        for i in 0..3 {
            let id = board.vias.len() as u64 + 100 + i as u64;
            board.elements[elem].silk.push(crate::board::Line {
                id,
                p1: Point::new(0.0, i as f64),
                p2: Point::new(10.0, i as f64),
                thickness: 0.2,
                clearance: 0.0,
                flags: Flags::empty(),
            });
        }
        let mut params = relaxed();
        params.min_silk = 0.5;
        let mut handler = Collect::default();
        let count = check_all(&mut board, &params, &mut handler).unwrap();
        assert_eq!(count, 2);
        assert_eq!(handler.violations[0].title, "silk line is too thin");
        assert_eq!(
            handler.violations[1].title,
            "element U1 has 3 silk lines which are too thin"
        );
    }

    #[test]
    fn aborting_handler_stops_the_run_with_a_clean_slate() {
        let mut board = Board::new(2);
        for i in 0..5 {
            board.add_line(
                0,
                Point::new(0.0, i as f64 * 10.0),
                Point::new(50.0, i as f64 * 10.0),
                0.2,
                2.0,
                Flags::empty(),
            );
        }
        let mut params = relaxed();
        params.min_width = 0.5;
        let mut handler = Collect {
            violations: Vec::new(),
            abort_after: Some(1),
        };
        let count = check_all(&mut board, &params, &mut handler).unwrap();
        assert_eq!(count, 1);
        let refs: Vec<_> = board.all_copper().collect();
        for r in refs {
            assert!(!board.test_flag(r, Flags::FOUND | Flags::DRC | Flags::SELECTED));
        }
    }

    #[test]
    fn flags_are_clean_after_a_full_run() {
        let mut board = Board::new(2);
        board.add_via(Point::new(0.0, 0.0), 2.0, 5.0, 1.0, Flags::empty());
        board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            2.0,
            5.0,
            Flags::empty(),
        );
        board.add_line(
            0,
            Point::new(12.5, 0.0),
            Point::new(20.0, 0.0),
            2.0,
            5.0,
            Flags::empty(),
        );
        let mut params = relaxed();
        params.bloat = 1.0;
        let mut handler = Collect::default();
        check_all(&mut board, &params, &mut handler).unwrap();
        let refs: Vec<_> = board.all_copper().collect();
        for r in refs {
            assert!(!board.test_flag(r, Flags::FOUND | Flags::DRC | Flags::SELECTED));
        }
    }
}
