//! Connectivity for a printed circuit board layout: a worklist scanner
//! that flags everything electrically connected to a seed object, a
//! design rule checker built on the same scanner run with signed bloat,
//! and a rats-nest builder that bridges the unconnected remainder of a
//! netlist with the shortest virtual wires.

#[macro_use]
extern crate bitflags;

pub mod board;
pub mod drc;
pub mod geom;
pub mod index;
pub mod netlist;
pub mod rats;
pub mod scan;

pub use crate::board::{Board, Flags, ObjectKind, ObjectRef, Side};
pub use crate::drc::{check_all, DrcHandler, DrcParams, Violation};
pub use crate::netlist::{NetMenu, NetlistLibrary};
pub use crate::rats::{add_all_rats, collect_subnets, Connection, Net};
pub use crate::scan::{
    find_unused_pins, lookup_connection, reset_connections, BoardObserver, NullObserver,
    ScanContext,
};
