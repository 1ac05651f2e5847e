//! The connectivity scanner.  Starting from a seed object it repeatedly
//! looks up everything the newest list entries touch, flags it and queues
//! it, until no list holds unprocessed work.  The same machinery serves
//! plain connection lookup, the rats-nest builder and the rule checker;
//! the checker runs it with a signed bloat and an early stop.

use crate::board::{Board, Flags, GroupEntry, ObjectRef, Pad, Polygon, Pv, Side};
use crate::geom::{self, aabb, ArcShape, Point, Seg};
use crate::index::BoardIndex;
use log::warn;

/// Gets told whenever a scan or a reset changes an object's flags, so a
/// caller can redraw or record undo steps.
pub trait BoardObserver {
    fn flag_changed(&mut self, board: &Board, r: ObjectRef);
}

pub struct NullObserver;

impl BoardObserver for NullObserver {
    fn flag_changed(&mut self, _board: &Board, _r: ObjectRef) {}
}

/// One worklist.  `location` separates processed from pending entries,
/// `draw_location` separates reported from unreported ones.
#[derive(Default)]
struct ScanList {
    items: Vec<ObjectRef>,
    location: usize,
    draw_location: usize,
}

impl ScanList {
    fn clear(&mut self) {
        self.items.clear();
        self.location = 0;
        self.draw_location = 0;
    }

    fn drained(&self) -> bool {
        self.location >= self.items.len()
    }
}

fn side_slot(side: Side) -> usize {
    match side {
        Side::Component => 0,
        Side::Solder => 1,
    }
}

/// Scan parameters and worklists.  Build one per board state; the spatial
/// index inside assumes the board geometry does not change between scans.
pub struct ScanContext {
    index: BoardIndex,
    /// Signed: positive for spacing checks, negative for overlap checks.
    pub bloat: f64,
    /// The flag bits newly reached objects receive.
    pub flag: Flags,
    /// Stop as soon as the scan would flag an object without SELECTED.
    pub drc: bool,
    thing: Option<ObjectRef>,
    pvs: ScanList,
    pads: [ScanList; 2],
    lines: Vec<ScanList>,
    arcs: Vec<ScanList>,
    polygons: Vec<ScanList>,
    rats: ScanList,
}

impl ScanContext {
    pub fn new(board: &Board) -> ScanContext {
        let layers = board.layers.len();
        ScanContext {
            index: BoardIndex::build(board),
            bloat: 0.0,
            flag: Flags::FOUND,
            drc: false,
            thing: None,
            pvs: ScanList::default(),
            pads: [ScanList::default(), ScanList::default()],
            lines: (0..layers).map(|_| ScanList::default()).collect(),
            arcs: (0..layers).map(|_| ScanList::default()).collect(),
            polygons: (0..layers).map(|_| ScanList::default()).collect(),
            rats: ScanList::default(),
        }
    }

    /// The object the last DRC-mode scan stopped on.
    pub fn thing(&self) -> Option<ObjectRef> {
        self.thing
    }

    pub fn dump_list(&mut self) {
        self.pvs.clear();
        for list in self.pads.iter_mut() {
            list.clear();
        }
        for list in self.lines.iter_mut() {
            list.clear();
        }
        for list in self.arcs.iter_mut() {
            list.clear();
        }
        for list in self.polygons.iter_mut() {
            list.clear();
        }
        self.rats.clear();
    }

    /// Drops pending work and queues the seed.  Returns true when the
    /// seed itself already violates in DRC mode.
    pub fn list_start(&mut self, board: &mut Board, seed: ObjectRef) -> bool {
        self.dump_list();
        self.enqueue(board, seed)
    }

    /// Flags and queues without the already-flagged test; seeds go
    /// through here so a re-seed of a flagged object still runs.
    fn enqueue(&mut self, board: &mut Board, r: ObjectRef) -> bool {
        board.set_flag(r, self.flag);
        match r {
            ObjectRef::Via(_) | ObjectRef::Pin { .. } => self.pvs.items.push(r),
            ObjectRef::Pad { .. } => {
                let slot = side_slot(board.pad(r).side());
                self.pads[slot].items.push(r);
            }
            ObjectRef::Line { layer, .. } => self.lines[layer].items.push(r),
            ObjectRef::Arc { layer, .. } => self.arcs[layer].items.push(r),
            ObjectRef::Polygon { layer, .. } => self.polygons[layer].items.push(r),
            ObjectRef::Rat(_) => self.rats.items.push(r),
        }
        if self.drc && !board.test_flag(r, Flags::SELECTED) {
            self.thing = Some(r);
            return true;
        }
        false
    }

    fn add(&mut self, board: &mut Board, r: ObjectRef) -> bool {
        if board.test_flag(r, self.flag) {
            return false;
        }
        self.enqueue(board, r)
    }

    pub fn lists_empty(&self, and_rats: bool) -> bool {
        let mut empty = self.pvs.drained();
        if and_rats {
            empty = empty && self.rats.drained();
        }
        empty
            && self.lines.iter().all(ScanList::drained)
            && self.arcs.iter().all(ScanList::drained)
            && self.polygons.iter().all(ScanList::drained)
    }

    /// Runs the lookup rounds to the fixed point.  Returns true when a
    /// DRC-mode scan stopped early; `thing()` then names the offender.
    pub fn find_connections(
        &mut self,
        board: &mut Board,
        and_rats: bool,
        observer: &mut dyn BoardObserver,
    ) -> bool {
        loop {
            let mut stop = self.lookup_pv_to_pv(board);
            if !stop {
                stop = self.lookup_lo_to_pv(board, and_rats);
            }
            if !stop {
                stop = self.lookup_lo_to_lo(board, and_rats);
            }
            if !stop {
                stop = self.lookup_pv_to_lo(board, and_rats);
            }
            self.report_new(board, observer);
            if stop {
                return true;
            }
            if self.lists_empty(and_rats) {
                return false;
            }
        }
    }

    fn report_new(&mut self, board: &Board, observer: &mut dyn BoardObserver) {
        fn drain(list: &mut ScanList, board: &Board, observer: &mut dyn BoardObserver) {
            while list.draw_location < list.items.len() {
                observer.flag_changed(board, list.items[list.draw_location]);
                list.draw_location += 1;
            }
        }
        drain(&mut self.pvs, board, observer);
        for list in self.pads.iter_mut() {
            drain(list, board, observer);
        }
        for list in self.lines.iter_mut() {
            drain(list, board, observer);
        }
        for list in self.arcs.iter_mut() {
            drain(list, board, observer);
        }
        for list in self.polygons.iter_mut() {
            drain(list, board, observer);
        }
        drain(&mut self.rats, board, observer);
    }

    /// New pins and vias touching queued ones.  The cursor is restored
    /// afterwards: the same entries still need their layer-object lookup.
    fn lookup_pv_to_pv(&mut self, board: &mut Board) -> bool {
        let save = self.pvs.location;
        while self.pvs.location < self.pvs.items.len() {
            let pv_ref = self.pvs.items[self.pvs.location];
            let bounds = board.pv(pv_ref).bounding_box();
            let mut cands = self.index.vias_near(&bounds, self.bloat);
            cands.extend(self.index.pins_near(&bounds, self.bloat));
            for cand in cands {
                if board.test_flag(cand, self.flag) {
                    continue;
                }
                let touches = pv_touch_pv(board.pv(pv_ref), board.pv(cand), self.bloat);
                if !touches {
                    continue;
                }
                if board.pv(cand).flags.contains(Flags::HOLE) {
                    let pos = board.pv(cand).pos;
                    warn!(
                        "unplated hole at ({}, {}) touches a pin or via",
                        pos.x, pos.y
                    );
                    board.set_flag(cand, Flags::WARN);
                    continue;
                }
                if self.add(board, cand) {
                    return true;
                }
            }
            self.pvs.location += 1;
        }
        self.pvs.location = save;
        false
    }

    /// Layer objects touching the queued pins and vias; consumes the PV
    /// cursor.
    fn lookup_lo_to_pv(&mut self, board: &mut Board, and_rats: bool) -> bool {
        while self.pvs.location < self.pvs.items.len() {
            let pv_ref = self.pvs.items[self.pvs.location];
            let bounds = board.pv(pv_ref).bounding_box();

            for &side in &[Side::Component, Side::Solder] {
                for cand in self.index.pads_near(side, &bounds, self.bloat) {
                    if board.test_flag(cand, self.flag) {
                        continue;
                    }
                    let touches =
                        pv_touches_pad(board.pv(pv_ref), board.pad(cand), self.bloat);
                    if touches && self.add(board, cand) {
                        return true;
                    }
                }
            }

            for layer in 0..board.layers.len() {
                if board.layers[layer].no_drc {
                    continue;
                }
                for cand in self.index.lines_near(layer, &bounds, self.bloat) {
                    if board.test_flag(cand, self.flag) {
                        continue;
                    }
                    let touches = pv_touches_seg(
                        board.pv(pv_ref),
                        &board.line(cand).seg(),
                        self.bloat,
                    );
                    if touches && self.add(board, cand) {
                        return true;
                    }
                }
                for cand in self.index.arcs_near(layer, &bounds, self.bloat) {
                    if board.test_flag(cand, self.flag) {
                        continue;
                    }
                    let touches = pv_touches_arc(
                        board.pv(pv_ref),
                        &board.arc(cand).shape(),
                        self.bloat,
                    );
                    if touches && self.add(board, cand) {
                        return true;
                    }
                }
                for index in 0..board.layers[layer].polygons.len() {
                    let cand = ObjectRef::Polygon { layer, index };
                    if board.test_flag(cand, self.flag) {
                        continue;
                    }
                    let joins = pv_joins_polygon(
                        board.pv(pv_ref),
                        board.polygon(cand),
                        layer,
                        self.bloat,
                    );
                    if joins && self.add(board, cand) {
                        return true;
                    }
                }
            }

            if and_rats {
                for cand in self.index.rats_near(&bounds, self.bloat) {
                    if board.test_flag(cand, self.flag) {
                        continue;
                    }
                    let hit = {
                        let pv = board.pv(pv_ref);
                        let rat = board.rat(cand);
                        rat.p1 == pv.pos || rat.p2 == pv.pos
                    };
                    if hit && self.add(board, cand) {
                        return true;
                    }
                }
            }
            self.pvs.location += 1;
        }
        false
    }

    /// Layer objects touching queued layer objects, walked per layer
    /// group.  Cursors stay put; the PV pass still has to see the same
    /// entries, so this pass keeps private resume positions.
    fn lookup_lo_to_lo(&mut self, board: &mut Board, and_rats: bool) -> bool {
        let layers = board.layers.len();
        let mut line_pos: Vec<usize> = self.lines.iter().map(|l| l.location).collect();
        let mut arc_pos: Vec<usize> = self.arcs.iter().map(|l| l.location).collect();
        let mut poly_pos: Vec<usize> = self.polygons.iter().map(|l| l.location).collect();
        let mut pad_pos = [self.pads[0].location, self.pads[1].location];
        let mut rat_pos = self.rats.location;

        loop {
            if and_rats {
                while rat_pos < self.rats.items.len() {
                    let rat_ref = self.rats.items[rat_pos];
                    let (p1, g1, p2, g2) = {
                        let rat = board.rat(rat_ref);
                        (rat.p1, rat.group1, rat.p2, rat.group2)
                    };
                    if self.lookup_lo_to_rat_end(board, &p1, g1) {
                        return true;
                    }
                    if self.lookup_lo_to_rat_end(board, &p2, g2) {
                        return true;
                    }
                    rat_pos += 1;
                }
            }
            for group in 0..board.groups.len() {
                for entry in 0..board.groups.groups[group].len() {
                    match board.groups.groups[group][entry] {
                        GroupEntry::Layer(layer) => {
                            while line_pos[layer] < self.lines[layer].items.len() {
                                let r = self.lines[layer].items[line_pos[layer]];
                                if self.lookup_lo_to_line(board, r, group) {
                                    return true;
                                }
                                line_pos[layer] += 1;
                            }
                            while arc_pos[layer] < self.arcs[layer].items.len() {
                                let r = self.arcs[layer].items[arc_pos[layer]];
                                if self.lookup_lo_to_arc(board, r, group) {
                                    return true;
                                }
                                arc_pos[layer] += 1;
                            }
                            while poly_pos[layer] < self.polygons[layer].items.len() {
                                let r = self.polygons[layer].items[poly_pos[layer]];
                                if self.lookup_lo_to_polygon(board, r, group) {
                                    return true;
                                }
                                poly_pos[layer] += 1;
                            }
                        }
                        GroupEntry::Side(side) => {
                            let slot = side_slot(side);
                            while pad_pos[slot] < self.pads[slot].items.len() {
                                let r = self.pads[slot].items[pad_pos[slot]];
                                if self.lookup_lo_to_pad(board, r, group) {
                                    return true;
                                }
                                pad_pos[slot] += 1;
                            }
                        }
                    }
                }
            }

            // later groups may have queued work for earlier ones
            let mut done = !and_rats || rat_pos >= self.rats.items.len();
            for layer in 0..layers {
                done = done
                    && line_pos[layer] >= self.lines[layer].items.len()
                    && arc_pos[layer] >= self.arcs[layer].items.len()
                    && poly_pos[layer] >= self.polygons[layer].items.len();
            }
            done = done
                && pad_pos[0] >= self.pads[0].items.len()
                && pad_pos[1] >= self.pads[1].items.len();
            if done {
                return false;
            }
        }
    }

    /// New pins and vias touching queued layer objects; consumes every
    /// layer-object cursor.
    fn lookup_pv_to_lo(&mut self, board: &mut Board, and_rats: bool) -> bool {
        for layer in 0..board.layers.len() {
            while self.lines[layer].location < self.lines[layer].items.len() {
                let r = self.lines[layer].items[self.lines[layer].location];
                let seg = board.line(r).seg();
                if self.pvs_touching_seg(board, &seg) {
                    return true;
                }
                self.lines[layer].location += 1;
            }
            while self.arcs[layer].location < self.arcs[layer].items.len() {
                let r = self.arcs[layer].items[self.arcs[layer].location];
                let shape = board.arc(r).shape();
                let bounds = shape.bounding_box();
                let mut cands = self.index.vias_near(&bounds, self.bloat);
                cands.extend(self.index.pins_near(&bounds, self.bloat));
                for cand in cands {
                    if board.test_flag(cand, self.flag) {
                        continue;
                    }
                    if !pv_touches_arc(board.pv(cand), &shape, self.bloat) {
                        continue;
                    }
                    if self.warn_if_hole(board, cand, "arc") {
                        continue;
                    }
                    if self.add(board, cand) {
                        return true;
                    }
                }
                self.arcs[layer].location += 1;
            }
            while self.polygons[layer].location < self.polygons[layer].items.len() {
                let r = self.polygons[layer].items[self.polygons[layer].location];
                let bounds = match board.polygon(r).bounding_box() {
                    Some(b) => b,
                    None => {
                        self.polygons[layer].location += 1;
                        continue;
                    }
                };
                let mut cands = self.index.vias_near(&bounds, self.bloat);
                cands.extend(self.index.pins_near(&bounds, self.bloat));
                for cand in cands {
                    if board.test_flag(cand, self.flag) {
                        continue;
                    }
                    let joins = pv_joins_polygon(
                        board.pv(cand),
                        board.polygon(r),
                        layer,
                        self.bloat,
                    );
                    // an unplated hole inside a polygon is normal and
                    // quietly stays unconnected
                    if !joins || board.pv(cand).flags.contains(Flags::HOLE) {
                        continue;
                    }
                    if self.add(board, cand) {
                        return true;
                    }
                }
                self.polygons[layer].location += 1;
            }
        }

        for slot in 0..2 {
            while self.pads[slot].location < self.pads[slot].items.len() {
                let r = self.pads[slot].items[self.pads[slot].location];
                let bounds = board.pad(r).bounding_box();
                let mut cands = self.index.vias_near(&bounds, self.bloat);
                cands.extend(self.index.pins_near(&bounds, self.bloat));
                for cand in cands {
                    if board.test_flag(cand, self.flag) {
                        continue;
                    }
                    if !pv_touches_pad(board.pv(cand), board.pad(r), self.bloat) {
                        continue;
                    }
                    if self.warn_if_hole(board, cand, "pad") {
                        continue;
                    }
                    if self.add(board, cand) {
                        return true;
                    }
                }
                self.pads[slot].location += 1;
            }
        }

        if and_rats {
            while self.rats.location < self.rats.items.len() {
                let r = self.rats.items[self.rats.location];
                let (p1, p2) = {
                    let rat = board.rat(r);
                    (rat.p1, rat.p2)
                };
                for point in &[p1, p2] {
                    let bounds = aabb(point.x, point.y, point.x, point.y);
                    let mut cands = self.index.vias_near(&bounds, 0.0);
                    cands.extend(self.index.pins_near(&bounds, 0.0));
                    for cand in cands {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        if board.pv(cand).pos == *point {
                            // rat joins never trip the early stop
                            let _ = self.add(board, cand);
                        }
                    }
                }
                self.rats.location += 1;
            }
        }
        false
    }

    fn pvs_touching_seg(&mut self, board: &mut Board, seg: &Seg) -> bool {
        let bounds = seg.rect();
        let mut cands = self.index.vias_near(&bounds, self.bloat);
        cands.extend(self.index.pins_near(&bounds, self.bloat));
        for cand in cands {
            if board.test_flag(cand, self.flag) {
                continue;
            }
            if !pv_touches_seg(board.pv(cand), seg, self.bloat) {
                continue;
            }
            if self.warn_if_hole(board, cand, "line") {
                continue;
            }
            if self.add(board, cand) {
                return true;
            }
        }
        false
    }

    fn warn_if_hole(&mut self, board: &mut Board, r: ObjectRef, what: &str) -> bool {
        if !board.pv(r).flags.contains(Flags::HOLE) {
            return false;
        }
        let pos = board.pv(r).pos;
        warn!("unplated hole at ({}, {}) touches a {}", pos.x, pos.y, what);
        board.set_flag(r, Flags::WARN);
        true
    }

    fn lookup_lo_to_line(&mut self, board: &mut Board, r: ObjectRef, group: usize) -> bool {
        let (seg, flags) = {
            let line = board.line(r);
            (line.seg(), line.flags)
        };
        self.lookup_lo_to_seg(board, &seg, flags, group, true)
    }

    /// Everything in the layer group touching a thick segment.  Serves
    /// both lines and round pads; `polys_to` is off for pads since pads
    /// join polygons from the polygon side only.
    fn lookup_lo_to_seg(
        &mut self,
        board: &mut Board,
        seg: &Seg,
        seg_flags: Flags,
        group: usize,
        polys_to: bool,
    ) -> bool {
        let bounds = seg.rect();

        for cand in self.index.rats_near(&bounds, self.bloat) {
            if board.test_flag(cand, self.flag) {
                continue;
            }
            let hit = {
                let rat = board.rat(cand);
                (rat.group1 == group && (rat.p1 == seg.p1 || rat.p1 == seg.p2))
                    || (rat.group2 == group && (rat.p2 == seg.p1 || rat.p2 == seg.p2))
            };
            if hit && self.add(board, cand) {
                return true;
            }
        }

        for entry in 0..board.groups.groups[group].len() {
            match board.groups.groups[group][entry] {
                GroupEntry::Layer(layer) => {
                    for cand in self.index.lines_near(layer, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        if geom::segs_touch(seg, &board.line(cand).seg(), self.bloat)
                            && self.add(board, cand)
                        {
                            return true;
                        }
                    }
                    for cand in self.index.arcs_near(layer, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        if geom::seg_arc_touch(seg, &board.arc(cand).shape(), self.bloat)
                            && self.add(board, cand)
                        {
                            return true;
                        }
                    }
                    if polys_to {
                        for index in 0..board.layers[layer].polygons.len() {
                            let cand = ObjectRef::Polygon { layer, index };
                            if board.test_flag(cand, self.flag) {
                                continue;
                            }
                            let joins =
                                seg_joins_polygon(seg, seg_flags, board.polygon(cand), self.bloat);
                            if joins && self.add(board, cand) {
                                return true;
                            }
                        }
                    }
                }
                GroupEntry::Side(side) => {
                    for cand in self.index.pads_near(side, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let touches =
                            seg_touches_pad(seg, &board.pad(cand).seg(), self.bloat);
                        if touches && self.add(board, cand) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn lookup_lo_to_arc(&mut self, board: &mut Board, r: ObjectRef, group: usize) -> bool {
        let (shape, flags) = {
            let arc = board.arc(r);
            (arc.shape(), arc.flags)
        };
        let bounds = shape.bounding_box();

        for entry in 0..board.groups.groups[group].len() {
            match board.groups.groups[group][entry] {
                GroupEntry::Layer(layer) => {
                    for cand in self.index.lines_near(layer, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        if geom::seg_arc_touch(&board.line(cand).seg(), &shape, self.bloat)
                            && self.add(board, cand)
                        {
                            return true;
                        }
                    }
                    for cand in self.index.arcs_near(layer, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        if geom::arcs_touch(&shape, &board.arc(cand).shape(), self.bloat)
                            && self.add(board, cand)
                        {
                            return true;
                        }
                    }
                    for index in 0..board.layers[layer].polygons.len() {
                        let cand = ObjectRef::Polygon { layer, index };
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let joins =
                            arc_joins_polygon(&shape, flags, board.polygon(cand), self.bloat);
                        if joins && self.add(board, cand) {
                            return true;
                        }
                    }
                }
                GroupEntry::Side(side) => {
                    for cand in self.index.pads_near(side, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let touches =
                            arc_touches_pad(&shape, &board.pad(cand).seg(), self.bloat);
                        if touches && self.add(board, cand) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn lookup_lo_to_pad(&mut self, board: &mut Board, r: ObjectRef, group: usize) -> bool {
        let (seg, flags) = {
            let pad = board.pad(r);
            (pad.seg(), pad.flags)
        };
        if !flags.contains(Flags::SQUARE) {
            return self.lookup_lo_to_seg(board, &seg, flags, group, false);
        }

        let bounds = seg.rect();
        for cand in self.index.rats_near(&bounds, self.bloat) {
            if board.test_flag(cand, self.flag) {
                continue;
            }
            let hit = {
                let rat = board.rat(cand);
                (rat.group1 == group && (rat.p1 == seg.p1 || rat.p1 == seg.p2))
                    || (rat.group2 == group && (rat.p2 == seg.p1 || rat.p2 == seg.p2))
            };
            if hit && self.add(board, cand) {
                return true;
            }
        }
        for entry in 0..board.groups.groups[group].len() {
            match board.groups.groups[group][entry] {
                GroupEntry::Layer(layer) => {
                    for cand in self.index.lines_near(layer, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let touches =
                            seg_touches_pad(&board.line(cand).seg(), &seg, self.bloat);
                        if touches && self.add(board, cand) {
                            return true;
                        }
                    }
                    for cand in self.index.arcs_near(layer, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let touches =
                            arc_touches_pad(&board.arc(cand).shape(), &seg, self.bloat);
                        if touches && self.add(board, cand) {
                            return true;
                        }
                    }
                    for index in 0..board.layers[layer].polygons.len() {
                        let cand = ObjectRef::Polygon { layer, index };
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let joins = pad_joins_polygon(&seg, board.polygon(cand), self.bloat);
                        if joins && self.add(board, cand) {
                            return true;
                        }
                    }
                }
                GroupEntry::Side(side) => {
                    for cand in self.index.pads_near(side, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let touches =
                            pads_touch(&board.pad(cand).seg(), &seg, self.bloat);
                        if touches && self.add(board, cand) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn lookup_lo_to_polygon(&mut self, board: &mut Board, r: ObjectRef, group: usize) -> bool {
        let (contour, flags, bounds) = {
            let poly = board.polygon(r);
            match (poly.contour(), poly.bounding_box()) {
                (Some(c), Some(b)) => (c.to_vec(), poly.flags, b),
                _ => return false,
            }
        };

        for entry in 0..board.groups.groups[group].len() {
            match board.groups.groups[group][entry] {
                GroupEntry::Layer(layer) => {
                    for index in 0..board.layers[layer].polygons.len() {
                        let cand = ObjectRef::Polygon { layer, index };
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let hit = match board.polygon(cand).contour() {
                            Some(c2) => geom::polygon_in_polygon(c2, &contour, self.bloat),
                            None => false,
                        };
                        if hit && self.add(board, cand) {
                            return true;
                        }
                    }
                    for cand in self.index.lines_near(layer, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let hit = {
                            let line = board.line(cand);
                            !(flags.contains(Flags::CLEARPOLY)
                                && line.flags.contains(Flags::CLEARLINE))
                                && geom::seg_in_polygon(&line.seg(), &contour, self.bloat)
                        };
                        if hit && self.add(board, cand) {
                            return true;
                        }
                    }
                    for cand in self.index.arcs_near(layer, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let hit = {
                            let arc = board.arc(cand);
                            !(flags.contains(Flags::CLEARPOLY)
                                && arc.flags.contains(Flags::CLEARLINE))
                                && geom::arc_in_polygon(&arc.shape(), &contour, self.bloat)
                        };
                        if hit && self.add(board, cand) {
                            return true;
                        }
                    }
                    for cand in self.index.rats_near(&bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let hit = {
                            let rat = board.rat(cand);
                            rat.p1 == contour[0] || rat.p2 == contour[0]
                        };
                        if hit && self.add(board, cand) {
                            return true;
                        }
                    }
                }
                GroupEntry::Side(side) => {
                    if flags.contains(Flags::CLEARPOLY) {
                        continue;
                    }
                    for cand in self.index.pads_near(side, &bounds, self.bloat) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let touches =
                            pad_in_contour(&board.pad(cand).seg(), &contour, self.bloat);
                        if touches && self.add(board, cand) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// Rat endpoints attach by exact coordinates: lines and pads by
    /// their end points, polygons by their first contour vertex.  Rats
    /// never touch arcs.
    fn lookup_lo_to_rat_end(&mut self, board: &mut Board, point: &Point, group: usize) -> bool {
        if group >= board.groups.len() {
            return false;
        }
        let bounds = aabb(point.x, point.y, point.x, point.y);
        for entry in 0..board.groups.groups[group].len() {
            match board.groups.groups[group][entry] {
                GroupEntry::Layer(layer) => {
                    for cand in self.index.lines_near(layer, &bounds, 0.0) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let hit = {
                            let line = board.line(cand);
                            line.p1 == *point || line.p2 == *point
                        };
                        if hit && self.add(board, cand) {
                            return true;
                        }
                    }
                    for index in 0..board.layers[layer].polygons.len() {
                        let cand = ObjectRef::Polygon { layer, index };
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let hit = match board.polygon(cand).contour() {
                            Some(c) => c[0] == *point,
                            None => false,
                        };
                        if hit && self.add(board, cand) {
                            return true;
                        }
                    }
                }
                GroupEntry::Side(side) => {
                    for cand in self.index.pads_near(side, &bounds, 0.0) {
                        if board.test_flag(cand, self.flag) {
                            continue;
                        }
                        let hit = {
                            let pad = board.pad(cand);
                            pad.p1 == *point || pad.p2 == *point
                        };
                        if hit && self.add(board, cand) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }
}

fn pv_touch_pv(a: &Pv, b: &Pv, bloat: f64) -> bool {
    let t1 = (a.thickness * 0.5 + bloat).max(0.0);
    let t2 = (b.thickness * 0.5 + bloat).max(0.0);
    if geom::point_on_pin(a.pos.x, a.pos.y, t1, &b.pos, b.thickness, b.square())
        || geom::point_on_pin(b.pos.x, b.pos.y, t2, &a.pos, a.thickness, a.square())
    {
        return true;
    }
    if !a.square() || !b.square() {
        return false;
    }
    let b1 = aabb(a.pos.x - t1, a.pos.y - t1, a.pos.x + t1, a.pos.y + t1);
    geom::boxes_touch(&b1, &b.bounding_box())
}

fn pv_touches_seg(pv: &Pv, seg: &Seg, bloat: f64) -> bool {
    if pv.square() {
        geom::seg_in_rectangle(&pv.bounding_box(), seg, bloat)
    } else {
        let radius = (pv.thickness * 0.5 + bloat).max(0.0);
        geom::point_on_seg(pv.pos.x, pv.pos.y, radius, seg)
    }
}

fn pv_touches_pad(pv: &Pv, pad: &Pad, bloat: f64) -> bool {
    if pad.flags.contains(Flags::SQUARE) {
        let radius = (pv.thickness * 0.5 + bloat).max(0.0);
        geom::point_in_rect(pv.pos.x, pv.pos.y, radius, &pad.seg().rect())
    } else {
        pv_touches_seg(pv, &pad.seg(), bloat)
    }
}

fn pv_touches_arc(pv: &Pv, arc: &ArcShape, bloat: f64) -> bool {
    if pv.square() {
        geom::arc_in_rectangle(&pv.bounding_box(), arc, bloat)
    } else {
        let radius = (pv.thickness * 0.5 + bloat).max(0.0);
        geom::point_on_arc(pv.pos.x, pv.pos.y, radius, arc)
    }
}

fn pv_joins_polygon(pv: &Pv, poly: &Polygon, layer: usize, bloat: f64) -> bool {
    let contour = match poly.contour() {
        Some(c) => c,
        None => return false,
    };
    if poly.flags.contains(Flags::CLEARPOLY) && pv.thermals & (1 << layer) == 0 {
        return false;
    }
    if pv.square() {
        geom::rect_in_polygon(&pv.bounding_box(), contour, bloat)
    } else {
        let radius = (pv.thickness * 0.5 + bloat).max(0.0);
        geom::point_in_polygon(pv.pos.x, pv.pos.y, radius, contour)
    }
}

fn seg_touches_pad(seg: &Seg, pad_seg: &Seg, bloat: f64) -> bool {
    if pad_seg.square {
        geom::seg_in_rectangle(&pad_seg.rect(), seg, bloat)
    } else {
        geom::segs_touch(seg, pad_seg, bloat)
    }
}

fn arc_touches_pad(arc: &ArcShape, pad_seg: &Seg, bloat: f64) -> bool {
    if pad_seg.square {
        geom::arc_in_rectangle(&pad_seg.rect(), arc, bloat)
    } else {
        geom::seg_arc_touch(pad_seg, arc, bloat)
    }
}

fn pads_touch(a: &Seg, b: &Seg, bloat: f64) -> bool {
    if a.square && b.square {
        let half = (b.thickness * 0.5 + bloat).max(0.0);
        let grown = geom::inflate(&geom::bounding_box_of(&[b.p1, b.p2]), half);
        return geom::boxes_touch(&a.rect(), &grown);
    }
    if a.square {
        seg_touches_pad(b, a, bloat)
    } else {
        seg_touches_pad(a, b, bloat)
    }
}

fn seg_joins_polygon(seg: &Seg, seg_flags: Flags, poly: &Polygon, bloat: f64) -> bool {
    let contour = match poly.contour() {
        Some(c) => c,
        None => return false,
    };
    if poly.flags.contains(Flags::CLEARPOLY) && seg_flags.contains(Flags::CLEARLINE) {
        return false;
    }
    geom::seg_in_polygon(seg, contour, bloat)
}

fn arc_joins_polygon(arc: &ArcShape, arc_flags: Flags, poly: &Polygon, bloat: f64) -> bool {
    let contour = match poly.contour() {
        Some(c) => c,
        None => return false,
    };
    if poly.flags.contains(Flags::CLEARPOLY) && arc_flags.contains(Flags::CLEARLINE) {
        return false;
    }
    geom::arc_in_polygon(arc, contour, bloat)
}

fn pad_in_contour(pad_seg: &Seg, contour: &[Point], bloat: f64) -> bool {
    if pad_seg.square {
        geom::rect_in_polygon(&pad_seg.rect(), contour, bloat)
    } else {
        geom::seg_in_polygon(pad_seg, contour, bloat)
    }
}

fn pad_joins_polygon(pad_seg: &Seg, poly: &Polygon, bloat: f64) -> bool {
    let contour = match poly.contour() {
        Some(c) => c,
        None => return false,
    };
    if poly.flags.contains(Flags::CLEARPOLY) {
        return false;
    }
    pad_in_contour(pad_seg, contour, bloat)
}

/// Clears the given flag bits from every object on the board.
pub fn reset_connections(
    board: &mut Board,
    flags: Flags,
    observer: &mut dyn BoardObserver,
) -> bool {
    let mut changed = false;
    let refs: Vec<ObjectRef> = board.all_copper().chain(board.all_rats()).collect();
    for r in refs {
        if board.test_flag(r, flags) {
            board.clear_flag(r, flags);
            observer.flag_changed(board, r);
            changed = true;
        }
    }
    changed
}

/// Flags everything connected to whatever sits at the given location.
/// Returns false when nothing is there.
pub fn lookup_connection(
    board: &mut Board,
    x: f64,
    y: f64,
    range: f64,
    flag: Flags,
    and_rats: bool,
    observer: &mut dyn BoardObserver,
) -> bool {
    let seed = match board.object_at(x, y, range) {
        Some(r) => r,
        None => return false,
    };
    let mut ctx = ScanContext::new(board);
    ctx.flag = flag;
    ctx.list_start(board, seed);
    ctx.find_connections(board, and_rats, observer);
    true
}

/// Re-seeds an existing context without touching flags already set;
/// the rats builder uses this to grow one subnet per call.
pub fn rat_find_hook(
    ctx: &mut ScanContext,
    board: &mut Board,
    seed: ObjectRef,
    and_rats: bool,
    observer: &mut dyn BoardObserver,
) {
    ctx.list_start(board, seed);
    ctx.find_connections(board, and_rats, observer);
}

/// Element pins and pads whose net consists of the seed alone.  Vias do
/// not count as connections; a pin tied only to a via stub is still
/// unused.
pub fn find_unused_pins(board: &mut Board, observer: &mut dyn BoardObserver) -> Vec<ObjectRef> {
    reset_connections(board, Flags::FOUND | Flags::SELECTED, observer);
    let mut ctx = ScanContext::new(board);

    let mut seeds = Vec::new();
    for (e, elem) in board.elements.iter().enumerate() {
        for (i, pin) in elem.pins.iter().enumerate() {
            if !pin.flags.contains(Flags::HOLE) {
                seeds.push(ObjectRef::Pin { element: e, pin: i });
            }
        }
        for i in 0..elem.pads.len() {
            seeds.push(ObjectRef::Pad { element: e, pad: i });
        }
    }

    let mut unused = Vec::new();
    for seed in seeds {
        if board.test_flag(seed, Flags::FOUND) {
            continue;
        }
        ctx.list_start(board, seed);
        ctx.find_connections(board, true, observer);
        let terminals = ctx.pads[0].items.len()
            + ctx.pads[1].items.len()
            + ctx
                .pvs
                .items
                .iter()
                .filter(|r| match r {
                    ObjectRef::Pin { .. } => true,
                    _ => false,
                })
                .count();
        if terminals == 1 {
            board.set_flag(seed, Flags::SELECTED);
            observer.flag_changed(board, seed);
            unused.push(seed);
        }
    }
    unused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Flags;
    use crate::geom::Point;

    fn scan_from(board: &mut Board, seed: ObjectRef) -> ScanContext {
        let mut ctx = ScanContext::new(board);
        ctx.list_start(board, seed);
        ctx.find_connections(board, false, &mut NullObserver);
        ctx
    }

    #[test]
    fn pin_line_via_chain() {
        let mut board = Board::new(2);
        let elem = board.add_element("U1");
        let pin = board.add_pin(
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
            Point::new(100.0, 0.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        let via = board.add_via(Point::new(100.0, 0.0), 10.0, 2.0, 4.0, Flags::empty());
        let stranger = board.add_via(Point::new(300.0, 0.0), 10.0, 2.0, 4.0, Flags::empty());

        scan_from(&mut board, pin);
        assert!(board.test_flag(pin, Flags::FOUND));
        assert!(board.test_flag(line, Flags::FOUND));
        assert!(board.test_flag(via, Flags::FOUND));
        assert!(!board.test_flag(stranger, Flags::FOUND));
    }

    #[test]
    fn layers_of_different_groups_stay_apart() {
        let mut board = Board::new(2);
        let top = board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        // same location, other side of the board
        let bottom = board.add_line(
            1,
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        scan_from(&mut board, top);
        assert!(board.test_flag(top, Flags::FOUND));
        assert!(!board.test_flag(bottom, Flags::FOUND));

        // a via stitches the sides together
        reset_connections(&mut board, Flags::FOUND, &mut NullObserver);
        board.add_via(Point::new(25.0, 0.0), 10.0, 2.0, 4.0, Flags::empty());
        scan_from(&mut board, top);
        assert!(board.test_flag(bottom, Flags::FOUND));
    }

    #[test]
    fn opposite_side_pads_need_a_via() {
        let mut board = Board::new(2);
        let elem = board.add_element("U1");
        let top = board.add_pad(
            elem,
            Point::new(0.0, 0.0),
            Point::new(8.0, 0.0),
            4.0,
            2.0,
            "1",
            Flags::empty(),
        );
        // stacked right underneath, on the solder side
        let bottom = board.add_pad(
            elem,
            Point::new(0.0, 0.0),
            Point::new(8.0, 0.0),
            4.0,
            2.0,
            "2",
            Flags::ONSOLDER,
        );
        scan_from(&mut board, top);
        assert!(!board.test_flag(bottom, Flags::FOUND));

        reset_connections(&mut board, Flags::FOUND, &mut NullObserver);
        board.add_via(Point::new(4.0, 0.0), 6.0, 2.0, 2.0, Flags::empty());
        scan_from(&mut board, top);
        assert!(board.test_flag(bottom, Flags::FOUND));
    }

    #[test]
    fn bare_hole_is_a_warning_not_a_connection() {
        let mut board = Board::new(2);
        let line = board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        let hole = board.add_via(Point::new(25.0, 0.0), 10.0, 2.0, 4.0, Flags::HOLE);
        let far_line = board.add_line(
            1,
            Point::new(25.0, 0.0),
            Point::new(80.0, 0.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        scan_from(&mut board, line);
        assert!(!board.test_flag(hole, Flags::FOUND));
        assert!(board.test_flag(hole, Flags::WARN));
        assert!(!board.test_flag(far_line, Flags::FOUND));
    }

    #[test]
    fn clearing_polygon_needs_a_thermal() {
        let mut board = Board::new(2);
        let poly = board.add_polygon(
            0,
            vec![
                Point::new(-50.0, -50.0),
                Point::new(50.0, -50.0),
                Point::new(50.0, 50.0),
                Point::new(-50.0, 50.0),
            ],
            Flags::CLEARPOLY,
        );
        let via = board.add_via(Point::new(0.0, 0.0), 10.0, 2.0, 4.0, Flags::empty());
        scan_from(&mut board, via);
        assert!(!board.test_flag(poly, Flags::FOUND));

        reset_connections(&mut board, Flags::FOUND, &mut NullObserver);
        board.pv_mut(via).thermals = 1 << 0;
        scan_from(&mut board, via);
        assert!(board.test_flag(poly, Flags::FOUND));
    }

    #[test]
    fn clearing_line_never_joins_clearing_polygon() {
        let mut board = Board::new(2);
        let poly = board.add_polygon(
            0,
            vec![
                Point::new(-50.0, -50.0),
                Point::new(50.0, -50.0),
                Point::new(50.0, 50.0),
                Point::new(-50.0, 50.0),
            ],
            Flags::CLEARPOLY,
        );
        let clearing = board.add_line(
            0,
            Point::new(-20.0, 0.0),
            Point::new(20.0, 0.0),
            4.0,
            2.0,
            Flags::CLEARLINE,
        );
        scan_from(&mut board, clearing);
        assert!(!board.test_flag(poly, Flags::FOUND));

        reset_connections(&mut board, Flags::FOUND, &mut NullObserver);
        let joining = board.add_line(
            0,
            Point::new(-20.0, 10.0),
            Point::new(20.0, 10.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        scan_from(&mut board, joining);
        assert!(board.test_flag(poly, Flags::FOUND));
    }

    #[test]
    fn rescan_is_idempotent() {
        let mut board = Board::new(2);
        let a = board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        board.add_line(
            0,
            Point::new(50.0, 0.0),
            Point::new(50.0, 50.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        let mut ctx = scan_from(&mut board, a);
        let first: Vec<bool> = board
            .all_copper()
            .map(|r| board.test_flag(r, Flags::FOUND))
            .collect();
        ctx.list_start(&mut board, a);
        ctx.find_connections(&mut board, false, &mut NullObserver);
        let second: Vec<bool> = board
            .all_copper()
            .map(|r| board.test_flag(r, Flags::FOUND))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn negative_bloat_demands_overlap() {
        let mut board = Board::new(2);
        // surfaces meet with 0.5 overlap depth
        let a = board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            2.0,
            1.0,
            Flags::empty(),
        );
        let b = board.add_line(
            0,
            Point::new(11.5, 0.0),
            Point::new(20.0, 0.0),
            2.0,
            1.0,
            Flags::empty(),
        );
        let mut ctx = ScanContext::new(&board);
        ctx.list_start(&mut board, a);
        ctx.find_connections(&mut board, false, &mut NullObserver);
        assert!(board.test_flag(b, Flags::FOUND));

        reset_connections(&mut board, Flags::FOUND, &mut NullObserver);
        ctx.bloat = -1.0;
        ctx.list_start(&mut board, a);
        ctx.find_connections(&mut board, false, &mut NullObserver);
        assert!(!board.test_flag(b, Flags::FOUND));
    }

    #[test]
    fn drc_mode_stops_on_foreign_copper() {
        let mut board = Board::new(2);
        let a = board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            2.0,
            1.0,
            Flags::empty(),
        );
        let b = board.add_line(
            0,
            Point::new(12.5, 0.0),
            Point::new(20.0, 0.0),
            2.0,
            1.0,
            Flags::empty(),
        );
        // paint the reference net
        board.set_flag(a, Flags::SELECTED);

        let mut ctx = ScanContext::new(&board);
        ctx.bloat = 1.0;
        ctx.drc = true;
        ctx.list_start(&mut board, a);
        let stopped = ctx.find_connections(&mut board, false, &mut NullObserver);
        assert!(stopped);
        assert_eq!(ctx.thing(), Some(b));
    }

    #[test]
    fn lookup_connection_from_coordinates() {
        let mut board = Board::new(2);
        let a = board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        let b = board.add_line(
            0,
            Point::new(50.0, 0.0),
            Point::new(50.0, 40.0),
            4.0,
            2.0,
            Flags::empty(),
        );
        assert!(lookup_connection(
            &mut board,
            25.0,
            0.0,
            1.0,
            Flags::FOUND,
            false,
            &mut NullObserver
        ));
        assert!(board.test_flag(a, Flags::FOUND));
        assert!(board.test_flag(b, Flags::FOUND));
        assert!(!lookup_connection(
            &mut board,
            500.0,
            500.0,
            1.0,
            Flags::FOUND,
            false,
            &mut NullObserver
        ));
    }

    #[test]
    fn unused_pin_report() {
        let mut board = Board::new(2);
        let elem = board.add_element("U1");
        let used = board.add_pin(
            elem,
            Point::new(0.0, 0.0),
            8.0,
            2.0,
            3.0,
            "1",
            Flags::empty(),
        );
        let lonely = board.add_pin(
            elem,
            Point::new(100.0, 0.0),
            8.0,
            2.0,
            3.0,
            "2",
            Flags::empty(),
        );
        let other = board.add_element("U2");
        let partner = board.add_pin(
            other,
            Point::new(0.0, 60.0),
            8.0,
            2.0,
            3.0,
            "1",
            Flags::empty(),
        );
        board.add_line(
            0,
            Point::new(0.0, 0.0),
            Point::new(0.0, 60.0),
            4.0,
            2.0,
            Flags::empty(),
        );

        let unused = find_unused_pins(&mut board, &mut NullObserver);
        assert_eq!(unused, vec![lonely]);
        assert!(board.test_flag(lonely, Flags::SELECTED));
        assert!(!board.test_flag(used, Flags::SELECTED));
        assert!(!board.test_flag(partner, Flags::SELECTED));
    }
}
