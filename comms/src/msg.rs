use std::{borrow::Cow, collections::BTreeMap, io};

use crate::{
    Deserialize, Serialize,
    wire::{self, Reader},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const ITEMS: Header = 2;
const PARAMS: Header = 3;

/// A parameter broadcast borrowing its module states.
///
/// Module names are unique, the publisher keeps them sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct Params<'a> {
    pub iteration: u64,
    pub message: &'a str,
    pub modules: Vec<(&'a str, &'a [u8])>,
}

impl Params<'_> {
    /// Copies the borrowed broadcast into an owned `ParamsUpdate`.
    pub fn to_owned_update(&self) -> ParamsUpdate {
        let modules = self
            .modules
            .iter()
            .map(|(name, state)| (name.to_string(), state.to_vec()))
            .collect();

        ParamsUpdate {
            iteration: self.iteration,
            message: self.message.to_string(),
            modules,
        }
    }
}

/// An owned parameter broadcast as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamsUpdate {
    pub iteration: u64,
    pub message: String,
    pub modules: BTreeMap<String, Vec<u8>>,
}

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// One sampler response, every entry is an independently encoded item.
    Items(Vec<&'a [u8]>),
    /// One learner parameter broadcast.
    Params(Params<'a>),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Asks a sampler for `batch_size` items.
    Sample { batch_size: usize },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name of the message kind, useful for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Data(Payload::Items(_)) => "data/items",
            Msg::Data(Payload::Params(_)) => "data/params",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());
                serde_json::to_writer(&mut *buf, cmd)?;
                Ok(None)
            }
            Msg::Data(Payload::Items(items)) => {
                buf.extend_from_slice(&ITEMS.to_be_bytes());
                wire::put_size(buf, items.len())?;

                for item in items {
                    wire::put_bytes(buf, item)?;
                }

                Ok(None)
            }
            Msg::Data(Payload::Params(params)) => {
                buf.extend_from_slice(&PARAMS.to_be_bytes());
                buf.extend_from_slice(&params.iteration.to_be_bytes());
                wire::put_bytes(buf, params.message.as_bytes())?;
                wire::put_size(buf, params.modules.len())?;

                for (name, state) in &params.modules {
                    wire::put_bytes(buf, name.as_bytes())?;
                    wire::put_bytes(buf, state)?;
                }

                Ok(None)
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind) {
            ERR => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            ITEMS => {
                let mut reader = Reader::new(rest);
                let n = reader.size()?;
                let items = (0..n)
                    .map(|_| reader.bytes())
                    .collect::<io::Result<Vec<_>>>()?;

                reader.finish()?;
                Ok(Self::Data(Payload::Items(items)))
            }
            PARAMS => {
                let mut reader = Reader::new(rest);
                let iteration = reader.u64()?;
                let message = reader.str()?;
                let n = reader.size()?;
                let modules = (0..n)
                    .map(|_| -> io::Result<_> { Ok((reader.str()?, reader.bytes()?)) })
                    .collect::<io::Result<Vec<_>>>()?;

                reader.finish()?;

                let params = Params {
                    iteration,
                    message,
                    modules,
                };

                Ok(Self::Data(Payload::Params(params)))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: &Msg) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap();
        if let Some(tail) = tail {
            buf.extend_from_slice(tail);
        }
        buf
    }

    #[test]
    fn sample_command_is_json() {
        let msg = Msg::Control(Command::Sample { batch_size: 32 });
        let buf = encode(&msg);

        assert_eq!(&buf[HEADER_SIZE..], br#"{"sample":{"batch_size":32}}"#);
        let Msg::Control(cmd) = Msg::deserialize(&buf).unwrap() else {
            panic!("expected a control message");
        };
        assert_eq!(cmd, Command::Sample { batch_size: 32 });
    }

    #[test]
    fn items_keep_their_boundaries() {
        let items: Vec<&[u8]> = vec![&b"a"[..], &b""[..], &b"ccc"[..]];
        let buf = encode(&Msg::Data(Payload::Items(items.clone())));

        let Msg::Data(Payload::Items(got)) = Msg::deserialize(&buf).unwrap() else {
            panic!("expected items");
        };
        assert_eq!(got, items);
    }

    #[test]
    fn params_decode_to_owned_update() {
        let params = Params {
            iteration: 3,
            message: "batch 3",
            modules: vec![("critic", &[4u8, 5][..]), ("actor", &[1u8, 2, 3][..])],
        };
        let buf = encode(&Msg::Data(Payload::Params(params)));

        let Msg::Data(Payload::Params(got)) = Msg::deserialize(&buf).unwrap() else {
            panic!("expected params");
        };
        let update = got.to_owned_update();

        assert_eq!(update.iteration, 3);
        assert_eq!(update.message, "batch 3");
        assert_eq!(update.modules["actor"], vec![1, 2, 3]);
        assert_eq!(update.modules["critic"], vec![4, 5]);
    }

    #[test]
    fn truncated_params_are_rejected() {
        let params = Params {
            iteration: 0,
            message: "",
            modules: vec![("actor", &[1u8, 2, 3][..])],
        };
        let buf = encode(&Msg::Data(Payload::Params(params)));

        let err = Msg::deserialize(&buf[..buf.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let buf = 9u32.to_be_bytes();
        let err = Msg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(Msg::deserialize(&[0, 1]).is_err());
    }
}
