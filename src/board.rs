//! The board model: copper objects, layers and layer groups, flags, and
//! the tagged references the scanner and checker use to name objects.

use crate::geom::{self, aabb, ArcShape, Point, Seg};
use crate::netlist::NetlistLibrary;
use ncollide2d::bounding_volume::AABB;
use std::collections::HashMap;

bitflags! {
    /// Per-object status and style bits.
    pub struct Flags: u32 {
        /// Reached by the most recent connectivity scan.
        const FOUND     = 0x0000_0001;
        /// Part of the user selection; the DRC also paints the reference
        /// net with this bit.
        const SELECTED  = 0x0000_0002;
        /// Scratch bit used while resolving the netlist and checking rules.
        const DRC       = 0x0000_0004;
        /// Something suspicious was reported about this object.
        const WARN      = 0x0000_0008;
        /// Square end caps / square pad stack.
        const SQUARE    = 0x0000_0010;
        /// Octagonal pad stack (drawn octagonal, connectivity treats it round).
        const OCTAGON   = 0x0000_0020;
        /// A hole without copper; never a connection by itself.
        const HOLE      = 0x0000_0040;
        /// Line or arc clears polygons instead of joining them.
        const CLEARLINE = 0x0000_0080;
        /// Polygon lets clearing objects carve themselves free.
        const CLEARPOLY = 0x0000_0100;
        /// Pad lives on the solder side.
        const ONSOLDER  = 0x0000_0200;
        /// The second pad point is the connection point.
        const EDGE2     = 0x0000_0400;
        /// On a rat line: the join happened at a via or inside a polygon.
        const VIA       = 0x0000_0800;
        const LOCKED    = 0x0000_1000;
    }
}

/// The kind of object a reference points at, for reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Pin,
    Via,
    Pad,
    Line,
    Arc,
    Polygon,
    Rat,
}

/// Names any object on the board by owner and index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Via(usize),
    Pin { element: usize, pin: usize },
    Pad { element: usize, pad: usize },
    Line { layer: usize, index: usize },
    Arc { layer: usize, index: usize },
    Polygon { layer: usize, index: usize },
    Rat(usize),
}

impl ObjectRef {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectRef::Via(_) => ObjectKind::Via,
            ObjectRef::Pin { .. } => ObjectKind::Pin,
            ObjectRef::Pad { .. } => ObjectKind::Pad,
            ObjectRef::Line { .. } => ObjectKind::Line,
            ObjectRef::Arc { .. } => ObjectKind::Arc,
            ObjectRef::Polygon { .. } => ObjectKind::Polygon,
            ObjectRef::Rat(_) => ObjectKind::Rat,
        }
    }

    pub fn is_pv(&self) -> bool {
        match self {
            ObjectRef::Via(_) | ObjectRef::Pin { .. } => true,
            _ => false,
        }
    }
}

/// A pin or via: a plated stack spanning every layer.
#[derive(Clone, Debug)]
pub struct Pv {
    pub id: u64,
    pub pos: Point,
    pub thickness: f64,
    pub clearance: f64,
    pub drill: f64,
    pub number: String,
    pub flags: Flags,
    /// Bit per layer: a thermal relief joins the stack to CLEARPOLY
    /// polygons on that layer.
    pub thermals: u32,
}

impl Pv {
    pub fn square(&self) -> bool {
        self.flags.contains(Flags::SQUARE)
    }

    pub fn bounding_box(&self) -> AABB<f64> {
        let t = self.thickness * 0.5;
        aabb(
            self.pos.x - t,
            self.pos.y - t,
            self.pos.x + t,
            self.pos.y + t,
        )
    }
}

/// Side of the board a pad (or anything single-sided) sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Component,
    Solder,
}

#[derive(Clone, Debug)]
pub struct Pad {
    pub id: u64,
    pub p1: Point,
    pub p2: Point,
    pub thickness: f64,
    pub clearance: f64,
    pub number: String,
    pub flags: Flags,
}

impl Pad {
    pub fn seg(&self) -> Seg {
        Seg {
            p1: self.p1,
            p2: self.p2,
            thickness: self.thickness,
            square: self.flags.contains(Flags::SQUARE),
        }
    }

    pub fn side(&self) -> Side {
        if self.flags.contains(Flags::ONSOLDER) {
            Side::Solder
        } else {
            Side::Component
        }
    }

    /// Where a rat line should attach.
    pub fn connection_point(&self) -> Point {
        if self.flags.contains(Flags::EDGE2) {
            self.p2
        } else {
            self.p1
        }
    }

    pub fn bounding_box(&self) -> AABB<f64> {
        self.seg().rect()
    }
}

#[derive(Clone, Debug)]
pub struct Line {
    pub id: u64,
    pub p1: Point,
    pub p2: Point,
    pub thickness: f64,
    pub clearance: f64,
    pub flags: Flags,
}

impl Line {
    pub fn seg(&self) -> Seg {
        Seg::new(self.p1, self.p2, self.thickness)
    }

    pub fn bounding_box(&self) -> AABB<f64> {
        self.seg().rect()
    }
}

#[derive(Clone, Debug)]
pub struct Arc {
    pub id: u64,
    pub center: Point,
    pub radius: f64,
    pub start_angle: f64,
    pub delta: f64,
    pub thickness: f64,
    pub clearance: f64,
    pub flags: Flags,
}

impl Arc {
    pub fn shape(&self) -> ArcShape {
        ArcShape {
            center: self.center,
            radius: self.radius,
            start_angle: self.start_angle,
            delta: self.delta,
            thickness: self.thickness,
        }
    }

    pub fn bounding_box(&self) -> AABB<f64> {
        self.shape().bounding_box()
    }
}

#[derive(Clone, Debug)]
pub struct Polygon {
    pub id: u64,
    /// The clipped outline.  `None` when clipping collapsed the polygon
    /// to nothing; such a polygon touches no other object.
    pub contour: Option<Vec<Point>>,
    pub flags: Flags,
}

impl Polygon {
    pub fn contour(&self) -> Option<&[Point]> {
        match &self.contour {
            Some(pts) if pts.len() >= 3 => Some(pts),
            _ => None,
        }
    }

    pub fn bounding_box(&self) -> Option<AABB<f64>> {
        self.contour().map(geom::bounding_box_of)
    }
}

/// A virtual connection drawn between two subnets of the same net.
#[derive(Clone, Debug)]
pub struct Rat {
    pub id: u64,
    pub p1: Point,
    pub p2: Point,
    pub group1: usize,
    pub group2: usize,
    pub flags: Flags,
}

impl Rat {
    pub fn bounding_box(&self) -> AABB<f64> {
        geom::bounding_box_of(&[self.p1, self.p2])
    }
}

#[derive(Clone, Debug, Default)]
pub struct Element {
    pub name: String,
    pub pins: Vec<Pv>,
    pub pads: Vec<Pad>,
    pub silk: Vec<Line>,
    pub attributes: HashMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct Layer {
    pub name: String,
    pub lines: Vec<Line>,
    pub arcs: Vec<Arc>,
    pub polygons: Vec<Polygon>,
    pub attributes: HashMap<String, String>,
    /// Derived from the `no-drc` attribute; refreshed before each check run.
    pub no_drc: bool,
}

/// What a layer group entry stands for: a copper layer, or one of the two
/// pad planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupEntry {
    Layer(usize),
    Side(Side),
}

/// Physically connected stacks of layers.  Objects on layers of the same
/// group can touch; different groups only meet through pins and vias.
#[derive(Clone, Debug, Default)]
pub struct LayerGroups {
    pub groups: Vec<Vec<GroupEntry>>,
}

impl LayerGroups {
    /// Two-sided default: layer 0 plus the component-side pads, layer 1
    /// plus the solder-side pads, every further layer alone.
    pub fn two_sided(layer_count: usize) -> LayerGroups {
        let mut groups = Vec::new();
        if layer_count > 0 {
            groups.push(vec![GroupEntry::Layer(0), GroupEntry::Side(Side::Component)]);
        }
        if layer_count > 1 {
            groups.push(vec![GroupEntry::Layer(1), GroupEntry::Side(Side::Solder)]);
        }
        for l in 2..layer_count {
            groups.push(vec![GroupEntry::Layer(l)]);
        }
        LayerGroups { groups }
    }

    pub fn group_of_layer(&self, layer: usize) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.contains(&GroupEntry::Layer(layer)))
    }

    pub fn group_of_side(&self, side: Side) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.contains(&GroupEntry::Side(side)))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Board {
    pub layers: Vec<Layer>,
    pub vias: Vec<Pv>,
    pub elements: Vec<Element>,
    pub rats: Vec<Rat>,
    /// Free-floating silkscreen lines not owned by any element.
    pub silk: Vec<Line>,
    pub groups: LayerGroups,
    pub netlist: NetlistLibrary,
    pub attributes: HashMap<String, String>,
    pub rat_thickness: f64,
    next_id: u64,
}

impl Board {
    pub fn new(layer_count: usize) -> Board {
        Board {
            layers: (0..layer_count)
                .map(|i| Layer {
                    name: format!("layer {}", i + 1),
                    ..Layer::default()
                })
                .collect(),
            vias: Vec::new(),
            elements: Vec::new(),
            rats: Vec::new(),
            silk: Vec::new(),
            groups: LayerGroups::two_sided(layer_count),
            netlist: NetlistLibrary::default(),
            attributes: HashMap::new(),
            rat_thickness: 1.0,
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn add_via(
        &mut self,
        pos: Point,
        thickness: f64,
        clearance: f64,
        drill: f64,
        flags: Flags,
    ) -> ObjectRef {
        let id = self.next_id();
        self.vias.push(Pv {
            id,
            pos,
            thickness,
            clearance,
            drill,
            number: String::new(),
            flags,
            thermals: 0,
        });
        ObjectRef::Via(self.vias.len() - 1)
    }

    pub fn add_element<S: Into<String>>(&mut self, name: S) -> usize {
        self.elements.push(Element {
            name: name.into(),
            ..Element::default()
        });
        self.elements.len() - 1
    }

    pub fn add_pin<S: Into<String>>(
        &mut self,
        element: usize,
        pos: Point,
        thickness: f64,
        clearance: f64,
        drill: f64,
        number: S,
        flags: Flags,
    ) -> ObjectRef {
        let id = self.next_id();
        self.elements[element].pins.push(Pv {
            id,
            pos,
            thickness,
            clearance,
            drill,
            number: number.into(),
            flags,
            thermals: 0,
        });
        ObjectRef::Pin {
            element,
            pin: self.elements[element].pins.len() - 1,
        }
    }

    pub fn add_pad<S: Into<String>>(
        &mut self,
        element: usize,
        p1: Point,
        p2: Point,
        thickness: f64,
        clearance: f64,
        number: S,
        flags: Flags,
    ) -> ObjectRef {
        let id = self.next_id();
        self.elements[element].pads.push(Pad {
            id,
            p1,
            p2,
            thickness,
            clearance,
            number: number.into(),
            flags,
        });
        ObjectRef::Pad {
            element,
            pad: self.elements[element].pads.len() - 1,
        }
    }

    pub fn add_line(
        &mut self,
        layer: usize,
        p1: Point,
        p2: Point,
        thickness: f64,
        clearance: f64,
        flags: Flags,
    ) -> ObjectRef {
        let id = self.next_id();
        self.layers[layer].lines.push(Line {
            id,
            p1,
            p2,
            thickness,
            clearance,
            flags,
        });
        ObjectRef::Line {
            layer,
            index: self.layers[layer].lines.len() - 1,
        }
    }

    pub fn add_arc(
        &mut self,
        layer: usize,
        center: Point,
        radius: f64,
        start_angle: f64,
        delta: f64,
        thickness: f64,
        clearance: f64,
        flags: Flags,
    ) -> ObjectRef {
        let id = self.next_id();
        self.layers[layer].arcs.push(Arc {
            id,
            center,
            radius,
            start_angle,
            delta,
            thickness,
            clearance,
            flags,
        });
        ObjectRef::Arc {
            layer,
            index: self.layers[layer].arcs.len() - 1,
        }
    }

    pub fn add_polygon(&mut self, layer: usize, contour: Vec<Point>, flags: Flags) -> ObjectRef {
        let id = self.next_id();
        self.layers[layer].polygons.push(Polygon {
            id,
            contour: Some(contour),
            flags,
        });
        ObjectRef::Polygon {
            layer,
            index: self.layers[layer].polygons.len() - 1,
        }
    }

    pub fn add_rat(
        &mut self,
        p1: Point,
        p2: Point,
        group1: usize,
        group2: usize,
        flags: Flags,
    ) -> ObjectRef {
        let id = self.next_id();
        self.rats.push(Rat {
            id,
            p1,
            p2,
            group1,
            group2,
            flags,
        });
        ObjectRef::Rat(self.rats.len() - 1)
    }

    pub fn add_silk_line(&mut self, p1: Point, p2: Point, thickness: f64) -> &Line {
        let id = self.next_id();
        self.silk.push(Line {
            id,
            p1,
            p2,
            thickness,
            clearance: 0.0,
            flags: Flags::empty(),
        });
        self.silk.last().unwrap()
    }

    /// Re-derives the per-layer `no_drc` marker from layer attributes.
    pub fn refresh_no_drc(&mut self) {
        for layer in &mut self.layers {
            layer.no_drc = layer.attributes.contains_key("no-drc");
        }
    }

    pub fn pv(&self, r: ObjectRef) -> &Pv {
        match r {
            ObjectRef::Via(i) => &self.vias[i],
            ObjectRef::Pin { element, pin } => &self.elements[element].pins[pin],
            _ => panic!("not a pin or via reference"),
        }
    }

    pub fn pv_mut(&mut self, r: ObjectRef) -> &mut Pv {
        match r {
            ObjectRef::Via(i) => &mut self.vias[i],
            ObjectRef::Pin { element, pin } => &mut self.elements[element].pins[pin],
            _ => panic!("not a pin or via reference"),
        }
    }

    pub fn pad(&self, r: ObjectRef) -> &Pad {
        match r {
            ObjectRef::Pad { element, pad } => &self.elements[element].pads[pad],
            _ => panic!("not a pad reference"),
        }
    }

    pub fn line(&self, r: ObjectRef) -> &Line {
        match r {
            ObjectRef::Line { layer, index } => &self.layers[layer].lines[index],
            _ => panic!("not a line reference"),
        }
    }

    pub fn arc(&self, r: ObjectRef) -> &Arc {
        match r {
            ObjectRef::Arc { layer, index } => &self.layers[layer].arcs[index],
            _ => panic!("not an arc reference"),
        }
    }

    pub fn polygon(&self, r: ObjectRef) -> &Polygon {
        match r {
            ObjectRef::Polygon { layer, index } => &self.layers[layer].polygons[index],
            _ => panic!("not a polygon reference"),
        }
    }

    pub fn rat(&self, r: ObjectRef) -> &Rat {
        match r {
            ObjectRef::Rat(i) => &self.rats[i],
            _ => panic!("not a rat reference"),
        }
    }

    pub fn flags_of(&self, r: ObjectRef) -> Flags {
        match r {
            ObjectRef::Via(_) | ObjectRef::Pin { .. } => self.pv(r).flags,
            ObjectRef::Pad { .. } => self.pad(r).flags,
            ObjectRef::Line { .. } => self.line(r).flags,
            ObjectRef::Arc { .. } => self.arc(r).flags,
            ObjectRef::Polygon { .. } => self.polygon(r).flags,
            ObjectRef::Rat(_) => self.rat(r).flags,
        }
    }

    fn flags_mut(&mut self, r: ObjectRef) -> &mut Flags {
        match r {
            ObjectRef::Via(i) => &mut self.vias[i].flags,
            ObjectRef::Pin { element, pin } => &mut self.elements[element].pins[pin].flags,
            ObjectRef::Pad { element, pad } => &mut self.elements[element].pads[pad].flags,
            ObjectRef::Line { layer, index } => &mut self.layers[layer].lines[index].flags,
            ObjectRef::Arc { layer, index } => &mut self.layers[layer].arcs[index].flags,
            ObjectRef::Polygon { layer, index } => &mut self.layers[layer].polygons[index].flags,
            ObjectRef::Rat(i) => &mut self.rats[i].flags,
        }
    }

    pub fn test_flag(&self, r: ObjectRef, flag: Flags) -> bool {
        self.flags_of(r).intersects(flag)
    }

    pub fn set_flag(&mut self, r: ObjectRef, flag: Flags) {
        self.flags_mut(r).insert(flag);
    }

    pub fn clear_flag(&mut self, r: ObjectRef, flag: Flags) {
        self.flags_mut(r).remove(flag);
    }

    pub fn id_of(&self, r: ObjectRef) -> u64 {
        match r {
            ObjectRef::Via(_) | ObjectRef::Pin { .. } => self.pv(r).id,
            ObjectRef::Pad { .. } => self.pad(r).id,
            ObjectRef::Line { .. } => self.line(r).id,
            ObjectRef::Arc { .. } => self.arc(r).id,
            ObjectRef::Polygon { .. } => self.polygon(r).id,
            ObjectRef::Rat(_) => self.rat(r).id,
        }
    }

    /// A representative location, for reports and for centering the view
    /// on a problem.
    pub fn position_of(&self, r: ObjectRef) -> Point {
        match r {
            ObjectRef::Via(_) | ObjectRef::Pin { .. } => self.pv(r).pos,
            ObjectRef::Pad { .. } => {
                let pad = self.pad(r);
                Point::new((pad.p1.x + pad.p2.x) * 0.5, (pad.p1.y + pad.p2.y) * 0.5)
            }
            ObjectRef::Line { .. } => {
                let line = self.line(r);
                Point::new(
                    (line.p1.x + line.p2.x) * 0.5,
                    (line.p1.y + line.p2.y) * 0.5,
                )
            }
            ObjectRef::Arc { .. } => self.arc(r).center,
            ObjectRef::Polygon { .. } => {
                let poly = self.polygon(r);
                match poly.contour() {
                    Some(c) => c[0],
                    None => Point::new(0.0, 0.0),
                }
            }
            ObjectRef::Rat(_) => {
                let rat = self.rat(r);
                Point::new((rat.p1.x + rat.p2.x) * 0.5, (rat.p1.y + rat.p2.y) * 0.5)
            }
        }
    }

    /// All pins and vias, vias first.
    pub fn all_pvs<'a>(&'a self) -> impl Iterator<Item = ObjectRef> + 'a {
        let vias = (0..self.vias.len()).map(ObjectRef::Via);
        let pins = self.elements.iter().enumerate().flat_map(|(e, elem)| {
            (0..elem.pins.len()).map(move |pin| ObjectRef::Pin { element: e, pin })
        });
        vias.chain(pins)
    }

    pub fn all_pads<'a>(&'a self) -> impl Iterator<Item = ObjectRef> + 'a {
        self.elements.iter().enumerate().flat_map(|(e, elem)| {
            (0..elem.pads.len()).map(move |pad| ObjectRef::Pad { element: e, pad })
        })
    }

    /// Every copper object on the board (no rats, no silk).
    pub fn all_copper<'a>(&'a self) -> impl Iterator<Item = ObjectRef> + 'a {
        let layer_objects = self.layers.iter().enumerate().flat_map(|(l, layer)| {
            let lines = (0..layer.lines.len()).map(move |index| ObjectRef::Line { layer: l, index });
            let arcs = (0..layer.arcs.len()).map(move |index| ObjectRef::Arc { layer: l, index });
            let polys = (0..layer.polygons.len())
                .map(move |index| ObjectRef::Polygon { layer: l, index });
            lines.chain(arcs).chain(polys)
        });
        self.all_pvs().chain(self.all_pads()).chain(layer_objects)
    }

    pub fn all_rats<'a>(&'a self) -> impl Iterator<Item = ObjectRef> + 'a {
        (0..self.rats.len()).map(ObjectRef::Rat)
    }

    /// Finds the topmost object within `radius` of a location.  Pins and
    /// pads take precedence, then vias, then layer copper.
    pub fn object_at(&self, x: f64, y: f64, radius: f64) -> Option<ObjectRef> {
        for (e, elem) in self.elements.iter().enumerate() {
            for (i, pin) in elem.pins.iter().enumerate() {
                if geom::point_on_pin(x, y, radius, &pin.pos, pin.thickness, pin.square()) {
                    return Some(ObjectRef::Pin { element: e, pin: i });
                }
            }
            for (i, pad) in elem.pads.iter().enumerate() {
                let hit = if pad.flags.contains(Flags::SQUARE) {
                    geom::point_in_rect(x, y, radius, &pad.seg().rect())
                } else {
                    geom::point_on_seg(x, y, radius, &pad.seg())
                };
                if hit {
                    return Some(ObjectRef::Pad { element: e, pad: i });
                }
            }
        }
        for (i, via) in self.vias.iter().enumerate() {
            if geom::point_on_pin(x, y, radius, &via.pos, via.thickness, via.square()) {
                return Some(ObjectRef::Via(i));
            }
        }
        for (l, layer) in self.layers.iter().enumerate() {
            for (i, line) in layer.lines.iter().enumerate() {
                if geom::point_on_seg(x, y, radius, &line.seg()) {
                    return Some(ObjectRef::Line { layer: l, index: i });
                }
            }
            for (i, arc) in layer.arcs.iter().enumerate() {
                if geom::point_on_arc(x, y, radius, &arc.shape()) {
                    return Some(ObjectRef::Arc { layer: l, index: i });
                }
            }
            for (i, poly) in layer.polygons.iter().enumerate() {
                if let Some(contour) = poly.contour() {
                    if geom::point_in_polygon(x, y, radius, contour) {
                        return Some(ObjectRef::Polygon { layer: l, index: i });
                    }
                }
            }
        }
        None
    }
}
