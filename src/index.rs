//! Spatial lookup for the connectivity scanner.  A sort-tile-recursive
//! bulk-loaded R-tree per object category; the board never changes while
//! a scan runs, so the trees are built once and only queried.

use crate::board::{Board, ObjectRef, Side};
use crate::geom::{self, aabb};
use ncollide2d::bounding_volume::AABB;
use ordered_float::OrderedFloat;

const NODE_CAPACITY: usize = 8;

enum Node {
    Leaf {
        bounds: AABB<f64>,
        items: Vec<(AABB<f64>, ObjectRef)>,
    },
    Branch {
        bounds: AABB<f64>,
        children: Vec<Node>,
    },
}

impl Node {
    fn bounds(&self) -> &AABB<f64> {
        match self {
            Node::Leaf { bounds, .. } => bounds,
            Node::Branch { bounds, .. } => bounds,
        }
    }

    fn search(&self, query: &AABB<f64>, out: &mut Vec<ObjectRef>) {
        match self {
            Node::Leaf { items, .. } => {
                for (b, r) in items {
                    if geom::boxes_touch(b, query) {
                        out.push(*r);
                    }
                }
            }
            Node::Branch { children, .. } => {
                for child in children {
                    if geom::boxes_touch(child.bounds(), query) {
                        child.search(query, out);
                    }
                }
            }
        }
    }
}

fn enclose(boxes: impl Iterator<Item = AABB<f64>>) -> AABB<f64> {
    let mut bounds: Option<AABB<f64>> = None;
    for b in boxes {
        bounds = Some(match bounds {
            Some(prev) => aabb(
                prev.mins.x.min(b.mins.x),
                prev.mins.y.min(b.mins.y),
                prev.maxs.x.max(b.maxs.x),
                prev.maxs.y.max(b.maxs.y),
            ),
            None => b,
        });
    }
    bounds.unwrap_or_else(|| aabb(0.0, 0.0, 0.0, 0.0))
}

fn center_x(b: &AABB<f64>) -> OrderedFloat<f64> {
    OrderedFloat(b.mins.x + b.maxs.x)
}

fn center_y(b: &AABB<f64>) -> OrderedFloat<f64> {
    OrderedFloat(b.mins.y + b.maxs.y)
}

/// Sort-tile-recursive packing: order by x, cut into vertical slices,
/// order each slice by y and chunk into nodes.
fn str_tiles<T>(mut items: Vec<T>, key_x: impl Fn(&T) -> OrderedFloat<f64>,
                key_y: impl Fn(&T) -> OrderedFloat<f64>) -> Vec<Vec<T>> {
    let leaf_count = (items.len() + NODE_CAPACITY - 1) / NODE_CAPACITY;
    let slice_count = (leaf_count as f64).sqrt().ceil() as usize;
    let slice_len = slice_count * NODE_CAPACITY;

    items.sort_by_key(|item| key_x(item));
    let mut tiles = Vec::with_capacity(leaf_count);
    let mut rest = items;
    while !rest.is_empty() {
        let take = slice_len.min(rest.len());
        let mut slice: Vec<T> = rest.drain(..take).collect();
        slice.sort_by_key(|item| key_y(item));
        while !slice.is_empty() {
            let take = NODE_CAPACITY.min(slice.len());
            tiles.push(slice.drain(..take).collect());
        }
    }
    tiles
}

pub struct RTree {
    root: Option<Node>,
}

impl RTree {
    pub fn build(items: Vec<(AABB<f64>, ObjectRef)>) -> RTree {
        if items.is_empty() {
            return RTree { root: None };
        }
        let mut level: Vec<Node> = str_tiles(items, |(b, _)| center_x(b), |(b, _)| center_y(b))
            .into_iter()
            .map(|tile| Node::Leaf {
                bounds: enclose(tile.iter().map(|(b, _)| b.clone())),
                items: tile,
            })
            .collect();
        while level.len() > 1 {
            level = str_tiles(level, |n| center_x(n.bounds()), |n| center_y(n.bounds()))
                .into_iter()
                .map(|tile| Node::Branch {
                    bounds: enclose(tile.iter().map(|n| n.bounds().clone())),
                    children: tile,
                })
                .collect();
        }
        RTree { root: level.pop() }
    }

    pub fn search(&self, query: &AABB<f64>, out: &mut Vec<ObjectRef>) {
        if let Some(root) = &self.root {
            if geom::boxes_touch(root.bounds(), query) {
                root.search(query, out);
            }
        }
    }
}

/// All the trees a scan needs.  Polygons are few per layer and their
/// containment tests are cheap to reject, so they are scanned linearly.
pub struct BoardIndex {
    pins: RTree,
    vias: RTree,
    pads: [RTree; 2],
    rats: RTree,
    lines: Vec<RTree>,
    arcs: Vec<RTree>,
}

fn pad_slot(side: Side) -> usize {
    match side {
        Side::Component => 0,
        Side::Solder => 1,
    }
}

impl BoardIndex {
    pub fn build(board: &Board) -> BoardIndex {
        let pins = board
            .elements
            .iter()
            .enumerate()
            .flat_map(|(e, elem)| {
                elem.pins.iter().enumerate().map(move |(i, pin)| {
                    (pin.bounding_box(), ObjectRef::Pin { element: e, pin: i })
                })
            })
            .collect();
        let vias = board
            .vias
            .iter()
            .enumerate()
            .map(|(i, via)| (via.bounding_box(), ObjectRef::Via(i)))
            .collect();
        let mut pads: [Vec<(AABB<f64>, ObjectRef)>; 2] = [Vec::new(), Vec::new()];
        for (e, elem) in board.elements.iter().enumerate() {
            for (i, pad) in elem.pads.iter().enumerate() {
                pads[pad_slot(pad.side())]
                    .push((pad.bounding_box(), ObjectRef::Pad { element: e, pad: i }));
            }
        }
        let rats = board
            .rats
            .iter()
            .enumerate()
            .map(|(i, rat)| (rat.bounding_box(), ObjectRef::Rat(i)))
            .collect();
        let lines = board
            .layers
            .iter()
            .enumerate()
            .map(|(l, layer)| {
                RTree::build(
                    layer
                        .lines
                        .iter()
                        .enumerate()
                        .map(|(i, line)| {
                            (line.bounding_box(), ObjectRef::Line { layer: l, index: i })
                        })
                        .collect(),
                )
            })
            .collect();
        let arcs = board
            .layers
            .iter()
            .enumerate()
            .map(|(l, layer)| {
                RTree::build(
                    layer
                        .arcs
                        .iter()
                        .enumerate()
                        .map(|(i, arc)| {
                            (arc.bounding_box(), ObjectRef::Arc { layer: l, index: i })
                        })
                        .collect(),
                )
            })
            .collect();
        let [pads_c, pads_s] = pads;
        BoardIndex {
            pins: RTree::build(pins),
            vias: RTree::build(vias),
            pads: [RTree::build(pads_c), RTree::build(pads_s)],
            rats: RTree::build(rats),
            lines,
            arcs,
        }
    }

    /// A positive bloat widens the query so no candidate is missed; a
    /// negative bloat still uses the plain box since overlap can only be
    /// deeper than contact.
    fn query_box(bounds: &AABB<f64>, bloat: f64) -> AABB<f64> {
        geom::inflate(bounds, bloat.max(0.0))
    }

    pub fn pins_near(&self, bounds: &AABB<f64>, bloat: f64) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        self.pins.search(&Self::query_box(bounds, bloat), &mut out);
        out
    }

    pub fn vias_near(&self, bounds: &AABB<f64>, bloat: f64) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        self.vias.search(&Self::query_box(bounds, bloat), &mut out);
        out
    }

    pub fn pads_near(&self, side: Side, bounds: &AABB<f64>, bloat: f64) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        self.pads[pad_slot(side)].search(&Self::query_box(bounds, bloat), &mut out);
        out
    }

    pub fn rats_near(&self, bounds: &AABB<f64>, bloat: f64) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        self.rats.search(&Self::query_box(bounds, bloat), &mut out);
        out
    }

    pub fn lines_near(&self, layer: usize, bounds: &AABB<f64>, bloat: f64) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        self.lines[layer].search(&Self::query_box(bounds, bloat), &mut out);
        out
    }

    pub fn arcs_near(&self, layer: usize, bounds: &AABB<f64>, bloat: f64) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        self.arcs[layer].search(&Self::query_box(bounds, bloat), &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Flags;
    use crate::geom::Point;

    #[test]
    fn finds_only_nearby_vias() {
        let mut board = Board::new(2);
        for i in 0..100 {
            board.add_via(
                Point::new(i as f64 * 50.0, 0.0),
                10.0,
                2.0,
                4.0,
                Flags::empty(),
            );
        }
        let index = BoardIndex::build(&board);
        let hits = index.vias_near(&aabb(95.0, -5.0, 105.0, 5.0), 0.0);
        assert_eq!(hits, vec![ObjectRef::Via(2)]);
    }

    #[test]
    fn bloat_widens_the_query() {
        let mut board = Board::new(2);
        board.add_via(Point::new(0.0, 0.0), 10.0, 2.0, 4.0, Flags::empty());
        let index = BoardIndex::build(&board);
        let probe = aabb(20.0, -1.0, 30.0, 1.0);
        assert!(index.vias_near(&probe, 0.0).is_empty());
        assert_eq!(index.vias_near(&probe, 20.0).len(), 1);
        // negative bloat never shrinks the probe below its own box
        assert!(index.vias_near(&probe, -50.0).is_empty());
    }

    #[test]
    fn empty_categories_are_fine() {
        let board = Board::new(2);
        let index = BoardIndex::build(&board);
        assert!(index
            .lines_near(0, &aabb(-1e9, -1e9, 1e9, 1e9), 0.0)
            .is_empty());
        assert!(index.pins_near(&aabb(-1e9, -1e9, 1e9, 1e9), 0.0).is_empty());
    }

    #[test]
    fn deep_tree_search_is_exhaustive() {
        let mut board = Board::new(1);
        for x in 0..30 {
            for y in 0..30 {
                board.add_line(
                    0,
                    Point::new(x as f64 * 10.0, y as f64 * 10.0),
                    Point::new(x as f64 * 10.0 + 4.0, y as f64 * 10.0),
                    2.0,
                    1.0,
                    Flags::empty(),
                );
            }
        }
        let index = BoardIndex::build(&board);
        let all = index.lines_near(0, &aabb(-10.0, -10.0, 300.0, 300.0), 0.0);
        assert_eq!(all.len(), 900);
        let corner = index.lines_near(0, &aabb(-1.0, -1.0, 11.0, 11.0), 0.0);
        assert_eq!(corner.len(), 4);
    }
}
