//! Minimal Telnet framing: the fixed server negotiation, IAC command
//! stripping on input and IAC escaping on output.

use crate::core::session::ByteFilter;

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;

/// Sent on connect: the device console owns echo and there is no go-ahead.
pub const NEGOTIATION: [u8; 6] = [IAC, WILL, OPT_ECHO, IAC, WILL, OPT_SUPPRESS_GO_AHEAD];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum DecodeState {
    #[default]
    Data,
    Command,
    OptionCode,
    Subnegotiation,
    SubnegotiationIac,
}

/// Strips option negotiation and commands from client input.
#[derive(Debug, Clone, Default)]
pub struct TelnetDecoder {
    state: DecodeState,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteFilter for TelnetDecoder {
    fn filter(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (DecodeState::Data, IAC) => DecodeState::Command,
                (DecodeState::Data, _) => {
                    out.push(byte);
                    DecodeState::Data
                }
                (DecodeState::Command, IAC) => {
                    out.push(IAC);
                    DecodeState::Data
                }
                (DecodeState::Command, WILL | WONT | DO | DONT) => DecodeState::OptionCode,
                (DecodeState::Command, SB) => DecodeState::Subnegotiation,
                (DecodeState::Command, _) => DecodeState::Data,
                (DecodeState::OptionCode, _) => DecodeState::Data,
                (DecodeState::Subnegotiation, IAC) => DecodeState::SubnegotiationIac,
                (DecodeState::Subnegotiation, _) => DecodeState::Subnegotiation,
                (DecodeState::SubnegotiationIac, SE) => DecodeState::Data,
                (DecodeState::SubnegotiationIac, _) => DecodeState::Subnegotiation,
            };
        }
    }
}

/// Escapes literal 0xFF in device output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelnetEncoder;

impl ByteFilter for TelnetEncoder {
    fn filter(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            if byte == IAC {
                out.push(IAC);
            }
            out.push(byte);
        }
    }
}
