//! The symbolic netlist: named nets with `RefDes-PinNumber` entries, as
//! loaded from a netlist file or a schematic import.

use failure::Fallible;
use failure_derive::*;

#[derive(Debug, Fail)]
pub enum NetlistError {
    #[fail(display = "bad net-list format encountered near: \"{}\"", 0)]
    BadConnection(String),
    #[fail(display = "terminal \"{}\" is claimed by more than one net", 0)]
    DuplicateTerminal(String),
}

/// One net of the library: the net name, an optional route style, and the
/// `RefDes-PinNumber` strings naming its terminals.
#[derive(Clone, Debug, Default)]
pub struct NetMenu {
    pub name: String,
    pub style: Option<String>,
    pub entries: Vec<String>,
    pub enabled: bool,
}

impl NetMenu {
    pub fn new<S: Into<String>>(name: S) -> NetMenu {
        NetMenu {
            name: name.into(),
            style: None,
            entries: Vec::new(),
            enabled: true,
        }
    }

    pub fn entry<S: Into<String>>(mut self, entry: S) -> NetMenu {
        self.entries.push(entry.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct NetlistLibrary {
    pub menus: Vec<NetMenu>,
}

impl NetlistLibrary {
    pub fn is_empty(&self) -> bool {
        self.menus.is_empty()
    }

    pub fn add(&mut self, menu: NetMenu) -> usize {
        self.menus.push(menu);
        self.menus.len() - 1
    }
}

/// Splits a `RefDes-PinNumber` terminal description.  The pin number is
/// everything after the first hyphen; a trailing run of lowercase letters
/// on the refdes (a slotted-part suffix) is stripped.
pub fn parse_connection(entry: &str) -> Fallible<(String, String)> {
    let bytes = entry.as_bytes();
    let dash = match bytes.iter().position(|&b| b == b'-') {
        Some(i) => i,
        None => return Err(NetlistError::BadConnection(entry.to_string()).into()),
    };
    let mut end = dash;
    while end > 0 && bytes[end - 1] >= b'a' {
        end -= 1;
    }
    let refdes = entry[..end].to_string();
    let number = entry[dash + 1..].to_string();
    Ok((refdes, number))
}
