/// The closed set of relay commands.
///
/// The discriminants are the wire command codes; the set is fixed by the
/// protocol, so decoding an unlisted byte is an error rather than an
/// extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    Status = 0,
    ReadBlock = 1,
    WriteBlock = 2,
    Format = 3,
    Control = 4,
    Init = 5,
    Open = 6,
    Close = 7,
    Read = 8,
    Write = 9,
    Reset = 10,
}

impl CommandCode {
    /// Map a wire command byte to its command, if any.
    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Status),
            1 => Some(Self::ReadBlock),
            2 => Some(Self::WriteBlock),
            3 => Some(Self::Format),
            4 => Some(Self::Control),
            5 => Some(Self::Init),
            6 => Some(Self::Open),
            7 => Some(Self::Close),
            8 => Some(Self::Read),
            9 => Some(Self::Write),
            10 => Some(Self::Reset),
            _ => None,
        }
    }

    /// The wire byte for this command.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Status => "status",
            Self::ReadBlock => "read-block",
            Self::WriteBlock => "write-block",
            Self::Format => "format",
            Self::Control => "control",
            Self::Init => "init",
            Self::Open => "open",
            Self::Close => "close",
            Self::Read => "read",
            Self::Write => "write",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_are_stable() {
        let table = [
            (0u8, CommandCode::Status),
            (1, CommandCode::ReadBlock),
            (2, CommandCode::WriteBlock),
            (3, CommandCode::Format),
            (4, CommandCode::Control),
            (5, CommandCode::Init),
            (6, CommandCode::Open),
            (7, CommandCode::Close),
            (8, CommandCode::Read),
            (9, CommandCode::Write),
            (10, CommandCode::Reset),
        ];
        for (wire, command) in table {
            assert_eq!(CommandCode::from_wire(wire), Some(command));
            assert_eq!(command.as_u8(), wire);
        }
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert_eq!(CommandCode::from_wire(11), None);
        assert_eq!(CommandCode::from_wire(0xFF), None);
    }
}
