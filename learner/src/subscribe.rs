use std::io;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Msg, ParamsUpdate, Payload},
};
use tokio::net::{
    TcpStream, ToSocketAddrs,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

/// The worker side of a `ParameterPublisher`.
pub struct ParameterSubscriber {
    rx: OnoReceiver<OwnedReadHalf>,
    _tx: OnoSender<OwnedWriteHalf>,
    buf: Vec<u8>,
}

impl ParameterSubscriber {
    /// Connects to a publisher.
    ///
    /// # Arguments
    /// * `addr` - The publisher's address.
    ///
    /// # Returns
    /// A new subscriber, it only receives what is published from now on.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);

        Ok(Self {
            rx,
            _tx: tx,
            buf: Vec::new(),
        })
    }

    /// Waits for the next parameter broadcast.
    ///
    /// # Returns
    /// The received update or an io error if the publisher went away or sent
    /// something that isn't a parameter broadcast.
    pub async fn recv(&mut self) -> io::Result<ParamsUpdate> {
        match self.rx.recv_into(&mut self.buf).await? {
            Msg::Data(Payload::Params(params)) => Ok(params.to_owned_update()),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected parameters, got {}", other.kind()),
            )),
        }
    }
}
