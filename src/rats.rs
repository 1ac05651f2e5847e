//! The rats-nest builder.  The netlist names terminals that should be
//! connected; the scanner tells us which of them already are; rat lines
//! are drawn between the remaining subnets, always bridging the closest
//! pair first.

use crate::board::{Board, Flags, ObjectRef, Side};
use crate::geom::{self, Point};
use crate::netlist::{parse_connection, NetlistError};
use crate::scan::{rat_find_hook, reset_connections, BoardObserver, NullObserver, ScanContext};
use failure::Fallible;
use log::{info, warn};
use ordered_float::OrderedFloat;
use std::collections::HashMap;

/// A point where a rat line may attach, together with the object it sits
/// on and the layer group the attachment lives in.
#[derive(Clone, Debug)]
pub struct Connection {
    pub pos: Point,
    pub obj: ObjectRef,
    pub group: usize,
    /// The net of the netlist that claimed this terminal, if any.
    pub menu: Option<usize>,
}

/// A subnet: attachment points that are already electrically connected.
#[derive(Clone, Debug, Default)]
pub struct Net {
    pub connections: Vec<Connection>,
    pub style: Option<String>,
}

/// Every terminal matching a `RefDes-PinNumber` pair, pads before pins.
/// An element may carry several pads with one number; all of them are
/// candidates.  Pins that are bare holes do not count.
fn pad_candidates(board: &Board, refdes: &str, number: &str) -> Vec<Connection> {
    let mut out = Vec::new();
    for (e, elem) in board.elements.iter().enumerate() {
        if elem.name != refdes {
            continue;
        }
        for (i, pad) in elem.pads.iter().enumerate() {
            if pad.number == number {
                let group = board.groups.group_of_side(pad.side()).unwrap_or(0);
                out.push(Connection {
                    pos: pad.connection_point(),
                    obj: ObjectRef::Pad { element: e, pad: i },
                    group,
                    menu: None,
                });
            }
        }
        for (i, pin) in elem.pins.iter().enumerate() {
            if pin.number == number && !pin.flags.contains(Flags::HOLE) {
                let group = board.groups.group_of_side(Side::Solder).unwrap_or(0);
                out.push(Connection {
                    pos: pin.pos,
                    obj: ObjectRef::Pin { element: e, pin: i },
                    group,
                    menu: None,
                });
            }
        }
    }
    out
}

/// Resolves one `RefDes-PinNumber` terminal against the board.  Pads win
/// over pins with the same number.
pub fn find_pad(board: &Board, refdes: &str, number: &str) -> Option<Connection> {
    pad_candidates(board, refdes, number).into_iter().next()
}

/// Walks the enabled net menus and resolves their entries.  Returns one
/// `Net` per menu holding every resolved terminal, plus the terminal to
/// menu assignment used for short detection.  Each entry claims the
/// first of its candidates not taken by an earlier entry; when every
/// candidate is taken the terminal is claimed twice and that is a hard
/// error.  Entries that resolve to nothing are logged and skipped so
/// the rest of the net still gets processed.
pub fn resolve_netlist(board: &mut Board) -> Fallible<(Vec<Net>, HashMap<ObjectRef, usize>)> {
    let mut observer = NullObserver;
    reset_connections(board, Flags::DRC, &mut observer);

    let mut nets = Vec::new();
    let mut assignment = HashMap::new();
    for menu_idx in 0..board.netlist.menus.len() {
        let menu = board.netlist.menus[menu_idx].clone();
        if !menu.enabled || menu.name.starts_with('*') {
            continue;
        }
        let mut net = Net {
            connections: Vec::new(),
            style: menu.style.clone(),
        };
        for entry in &menu.entries {
            let (refdes, number) = match parse_connection(entry) {
                Ok(split) => split,
                Err(err) => {
                    warn!("{}", err);
                    continue;
                }
            };
            let candidates = pad_candidates(board, &refdes, &number);
            if candidates.is_empty() {
                warn!(
                    "can not find {}-{} called for in net \"{}\"",
                    refdes, number, menu.name
                );
                continue;
            }
            let free = candidates
                .into_iter()
                .find(|conn| !board.test_flag(conn.obj, Flags::DRC));
            match free {
                Some(mut conn) => {
                    board.set_flag(conn.obj, Flags::DRC);
                    assignment.insert(conn.obj, menu_idx);
                    conn.menu = Some(menu_idx);
                    net.connections.push(conn);
                }
                None => return Err(NetlistError::DuplicateTerminal(entry.clone()).into()),
            }
        }
        if !net.connections.is_empty() {
            nets.push(net);
        }
    }
    Ok((nets, assignment))
}

/// Warns about terminals the scan reached that belong to another net, or
/// to none.  Such copper is a short against the netlist.
pub fn check_shorts(
    board: &mut Board,
    assignment: &HashMap<ObjectRef, usize>,
    menu: usize,
) -> bool {
    let menu_name = board.netlist.menus[menu].name.clone();
    let terminals: Vec<ObjectRef> = board
        .all_pvs()
        .filter(|r| match r {
            ObjectRef::Pin { .. } => true,
            _ => false,
        })
        .chain(board.all_pads())
        .collect();
    let mut warned = false;
    for r in terminals {
        if !board.test_flag(r, Flags::DRC) {
            continue;
        }
        match assignment.get(&r) {
            Some(&m) if m == menu => {}
            Some(&m) => {
                let other = board.netlist.menus[m].name.clone();
                warn!(
                    "net \"{}\" is shorted to net \"{}\" at {:?}",
                    menu_name, other, r
                );
                board.set_flag(r, Flags::WARN);
                warned = true;
            }
            None => {
                warn!(
                    "net \"{}\" is shorted to an unnamed terminal {:?}",
                    menu_name, r
                );
                board.set_flag(r, Flags::WARN);
                warned = true;
            }
        }
    }
    warned
}

/// Merges singleton nets that are already electrically connected into
/// subnets, one scan per remaining subnet, and adds the extra attachment
/// points a router can use: manhattan line endpoints, one contour vertex
/// per polygon, and via centers.  With an assignment map the scan result
/// is also checked for shorts.
pub fn gather_subnets(
    board: &mut Board,
    ctx: &mut ScanContext,
    nets: &mut Vec<Net>,
    and_rats: bool,
    assignment: Option<(&HashMap<ObjectRef, usize>, usize)>,
) -> bool {
    let mut observer = NullObserver;
    let mut warned = false;
    let mut m = 0;
    while m < nets.len() {
        reset_connections(board, Flags::DRC, &mut observer);
        ctx.flag = Flags::DRC;
        ctx.bloat = 0.0;
        ctx.drc = false;
        let seed = nets[m].connections[0].obj;
        rat_find_hook(ctx, board, seed, and_rats, &mut observer);

        let mut n = m + 1;
        while n < nets.len() {
            if board.test_flag(nets[n].connections[0].obj, Flags::DRC) {
                let moved: Vec<Connection> = nets[n].connections.drain(..).collect();
                nets[m].connections.extend(moved);
                nets.swap_remove(n);
            } else {
                n += 1;
            }
        }

        let mut extra = Vec::new();
        for (l, layer) in board.layers.iter().enumerate() {
            let group = match board.groups.group_of_layer(l) {
                Some(g) => g,
                None => continue,
            };
            for (i, line) in layer.lines.iter().enumerate() {
                // only axis-aligned endpoints; the router can't reach into
                // a diagonal stroke
                if line.flags.contains(Flags::DRC)
                    && (line.p1.x == line.p2.x || line.p1.y == line.p2.y)
                {
                    let obj = ObjectRef::Line { layer: l, index: i };
                    for &pos in &[line.p1, line.p2] {
                        extra.push(Connection {
                            pos,
                            obj,
                            group,
                            menu: None,
                        });
                    }
                }
            }
            for (i, poly) in layer.polygons.iter().enumerate() {
                if !poly.flags.contains(Flags::DRC) {
                    continue;
                }
                if let Some(contour) = poly.contour() {
                    extra.push(Connection {
                        pos: contour[0],
                        obj: ObjectRef::Polygon { layer: l, index: i },
                        group,
                        menu: None,
                    });
                }
            }
        }
        let solder_group = board.groups.group_of_side(Side::Solder).unwrap_or(0);
        for (i, via) in board.vias.iter().enumerate() {
            if via.flags.contains(Flags::DRC) {
                extra.push(Connection {
                    pos: via.pos,
                    obj: ObjectRef::Via(i),
                    group: solder_group,
                    menu: None,
                });
            }
        }
        nets[m].connections.extend(extra);

        if let Some((map, menu)) = assignment {
            warned |= check_shorts(board, map, menu);
        }
        m += 1;
    }
    warned
}

fn polygon_contains(board: &Board, conn: &Connection, point: &Point) -> bool {
    match conn.obj {
        ObjectRef::Polygon { .. } => match board.polygon(conn.obj).contour() {
            Some(contour) => geom::point_in_polygon(point.x, point.y, 0.0, contour),
            None => false,
        },
        _ => false,
    }
}

/// Squared rat length; a point sitting inside a polygon of the same group
/// counts as already touching it.
fn join_distance(board: &Board, c1: &Connection, c2: &Connection) -> f64 {
    if c1.group == c2.group
        && (polygon_contains(board, c1, &c2.pos) || polygon_contains(board, c2, &c1.pos))
    {
        return 0.0;
    }
    geom::square_dist(&c1.pos, &c2.pos)
}

/// Among equally short joins a via endpoint makes the better anchor.
fn via_join(c1: &Connection, c2: &Connection) -> bool {
    match (c1.obj, c2.obj) {
        (ObjectRef::Via(_), _) | (_, ObjectRef::Via(_)) => true,
        _ => false,
    }
}

/// Bridges the subnets with rat lines, closest pair first, until one
/// subnet remains: exactly n−1 rats for n subnets.  A zero-length join
/// (via centers, polygon containment) gets the VIA flag, and among
/// zero-length joins one anchored on a via beats one anchored on other
/// copper.  `rat_fn` replaces the rat drawing when the caller wants
/// real objects instead.
pub fn connect_subnets(
    board: &mut Board,
    mut nets: Vec<Net>,
    mut rat_fn: Option<&mut dyn FnMut(&mut Board, &Connection, &Connection)>,
) -> bool {
    if nets.is_empty() {
        return false;
    }
    let mut changed = false;
    while nets.len() > 1 {
        let mut best: Option<(usize, usize, usize, f64, bool)> = None;
        for j in 1..nets.len() {
            for (n, c1) in nets[0].connections.iter().enumerate() {
                for (m, c2) in nets[j].connections.iter().enumerate() {
                    let d = join_distance(board, c1, c2);
                    let through_via = via_join(c1, c2);
                    let better = match best {
                        None => true,
                        Some((_, _, _, bd, bv)) => {
                            OrderedFloat(d) < OrderedFloat(bd)
                                || (d == 0.0 && bd == 0.0 && through_via && !bv)
                        }
                    };
                    if better {
                        best = Some((j, n, m, d, through_via));
                    }
                }
            }
        }
        let (j, n, m, dist, _) = match best {
            Some(found) => found,
            None => break,
        };
        let c1 = nets[0].connections[n].clone();
        let c2 = nets[j].connections[m].clone();
        match rat_fn.as_mut() {
            Some(f) => f(board, &c1, &c2),
            None => {
                let mut flags = Flags::empty();
                if dist == 0.0 {
                    flags |= Flags::VIA;
                }
                board.add_rat(c1.pos, c2.pos, c1.group, c2.group, flags);
            }
        }
        changed = true;
        let moved: Vec<Connection> = nets[j].connections.drain(..).collect();
        nets[0].connections.extend(moved);
        nets.swap_remove(j);
    }
    changed
}

fn singletons(net: &Net, board: &Board, selected_only: bool) -> Vec<Net> {
    net.connections
        .iter()
        .filter(|conn| !selected_only || board.test_flag(conn.obj, Flags::SELECTED))
        .map(|conn| Net {
            connections: vec![conn.clone()],
            style: net.style.clone(),
        })
        .collect()
}

/// The whole pipeline: resolve the netlist, gather what is already
/// connected, and draw the missing rats.  Returns whether anything was
/// added.  Without a netlist this is a logged no-op.
pub fn add_all_rats(
    board: &mut Board,
    selected_only: bool,
    mut rat_fn: Option<&mut dyn FnMut(&mut Board, &Connection, &Connection)>,
    observer: &mut dyn BoardObserver,
) -> Fallible<bool> {
    if board.netlist.is_empty() {
        info!("no netlist is loaded; nothing to connect");
        return Ok(false);
    }
    let (menus, assignment) = resolve_netlist(board)?;
    let mut changed = false;
    for net in &menus {
        let menu = match net.connections[0].menu {
            Some(m) => m,
            None => continue,
        };
        let mut subnets = singletons(net, board, selected_only);
        if subnets.is_empty() {
            continue;
        }
        // rats drawn for earlier nets are connections too, so the index
        // is rebuilt per net
        let mut ctx = ScanContext::new(board);
        gather_subnets(
            board,
            &mut ctx,
            &mut subnets,
            true,
            Some((&assignment, menu)),
        );
        let connected = match rat_fn {
            Some(ref mut f) => connect_subnets(board, subnets, Some(&mut **f)),
            None => connect_subnets(board, subnets, None),
        };
        if connected {
            changed = true;
        }
    }
    reset_connections(board, Flags::DRC, observer);
    Ok(changed)
}

/// The gathering half of `add_all_rats` alone: the subnet structure per
/// net, without drawing anything.
pub fn collect_subnets(board: &mut Board, selected_only: bool) -> Fallible<Vec<Vec<Net>>> {
    if board.netlist.is_empty() {
        return Ok(Vec::new());
    }
    let (menus, assignment) = resolve_netlist(board)?;
    let mut out = Vec::new();
    for net in &menus {
        let menu = match net.connections[0].menu {
            Some(m) => m,
            None => continue,
        };
        let mut subnets = singletons(net, board, selected_only);
        if subnets.is_empty() {
            continue;
        }
        let mut ctx = ScanContext::new(board);
        gather_subnets(
            board,
            &mut ctx,
            &mut subnets,
            true,
            Some((&assignment, menu)),
        );
        out.push(subnets);
    }
    let mut observer = NullObserver;
    reset_connections(board, Flags::DRC, &mut observer);
    Ok(out)
}
