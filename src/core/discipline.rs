//! Line discipline between network terminals and raw serial consoles.
//!
//! Each direction carries one byte of state (the last byte seen) and is owned
//! by exactly one session, so two sessions can be mid-line independently.

pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';
pub const DEL: u8 = 0x7f;
pub const BS: u8 = 0x08;
pub const NUL: u8 = 0x00;

/// Serial -> network: canonicalizes bare LF into CRLF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxDiscipline {
    last: u8,
}

impl RxDiscipline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one device byte, appending the network bytes to `out`.
    pub fn push(&mut self, byte: u8, out: &mut Vec<u8>) {
        if byte == LF && self.last != CR {
            out.push(CR);
        }
        out.push(byte);
        self.last = byte;
    }

    pub fn apply(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() + input.len() / 8);
        for &byte in input {
            self.push(byte, &mut out);
        }
        out
    }
}

/// Network -> serial: terminates bare CR with LF and maps DEL to BS.
///
/// The LF is emitted as soon as the CR arrives so a lone "Enter" reaches the
/// device immediately; an LF that directly follows is then swallowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDiscipline {
    last: u8,
}

impl TxDiscipline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one client byte, appending the device bytes to `out`.
    pub fn push(&mut self, byte: u8, out: &mut Vec<u8>) {
        match byte {
            // telnet clients send CR NUL for Enter
            NUL => return,
            LF if self.last == CR => {}
            CR => {
                out.push(CR);
                out.push(LF);
            }
            DEL => out.push(BS),
            _ => out.push(byte),
        }
        self.last = byte;
    }

    pub fn apply(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() + 1);
        for &byte in input {
            self.push(byte, &mut out);
        }
        out
    }
}
