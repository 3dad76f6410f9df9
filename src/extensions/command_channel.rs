use super::{ExtendedCommandTransport, Error};
use crate::{constants::SSH_FXP_EXTENDED, utils::ErrorExt, ChannelSink, PipedInput, PipedOutput};

use std::collections::HashMap;
use std::convert::TryInto;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio::task::{spawn, JoinHandle};
use tokio_io_utility::read_exact_to_bytes;

/// `None` once the read task is done, no more replies will arrive.
type Responses = Mutex<Option<HashMap<u32, oneshot::Sender<Bytes>>>>;

/// Outstanding extended request of a [`SftpCommandChannel`].
#[derive(Debug)]
pub struct CommandHandle {
    id: u32,
    receiver: oneshot::Receiver<Bytes>,
}

impl CommandHandle {
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Sends extended requests over a piped sftp channel and correlates the
/// replies by request id.
///
/// Replies are read by a background task that owns the [`PipedInput`].
/// Once that task ends (EOF, error or channel teardown) every outstanding
/// and later request fails with [`Error::Cancelled`].
///
/// Dropping the channel without [`SftpCommandChannel::close`] aborts the
/// read task, which closes the input.
#[derive(Debug)]
pub struct SftpCommandChannel<S: ChannelSink + 'static> {
    output: PipedOutput<S>,
    responses: Arc<Responses>,
    next_id: AtomicU32,
    /// `None` once taken by `close`.
    read_task: Option<JoinHandle<Result<(), Error>>>,
}

impl<S: ChannelSink + 'static> SftpCommandChannel<S> {
    /// Must be called within a tokio runtime.
    pub fn new(output: PipedOutput<S>, input: PipedInput) -> Self {
        let responses = Arc::new(Mutex::new(Some(HashMap::new())));
        let read_task = spawn(read_replies(input, Arc::clone(&responses)));

        Self {
            output,
            responses,
            next_id: AtomicU32::new(0),
            read_task: Some(read_task),
        }
    }

    /// Number of requests still waiting for their reply.
    pub fn pending_requests(&self) -> usize {
        self.responses.lock().as_ref().map_or(0, HashMap::len)
    }

    fn register(&self) -> Result<CommandHandle, Error> {
        let (sender, receiver) = oneshot::channel();

        let mut responses = self.responses.lock();
        let responses = responses.as_mut().ok_or(Error::Cancelled)?;

        let mut id = self.next_id.fetch_add(1, Ordering::Relaxed);
        while responses.contains_key(&id) {
            id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        responses.insert(id, sender);

        Ok(CommandHandle { id, receiver })
    }

    fn unregister(&self, id: u32) {
        if let Some(responses) = self.responses.lock().as_mut() {
            responses.remove(&id);
        }
    }

    /// Close the output, then wait for the peer to close its side and for
    /// the read task to finish.
    pub async fn close(mut self) -> Result<(), Error> {
        let res = self.output.close().await;
        // Keep the handle until the task is done so that cancelling this
        // future still aborts it on drop.
        let read_res = match self.read_task.as_mut() {
            Some(read_task) => {
                let res = read_task.await;
                self.read_task = None;
                res.unwrap_or_else(|join_err| Err(join_err.into()))
            }
            None => Ok(()),
        };

        match (res, read_res) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Err(err), Err(read_err)) => Err(err.error_on_cleanup(read_err)),
        }
    }
}

impl<S: ChannelSink + 'static> Drop for SftpCommandChannel<S> {
    fn drop(&mut self) {
        if let Some(read_task) = self.read_task.take() {
            read_task.abort();
        }
    }
}

#[async_trait]
impl<S: ChannelSink + 'static> ExtendedCommandTransport for SftpCommandChannel<S> {
    type Handle = CommandHandle;

    async fn send_extended_command(&self, buffer: Bytes) -> Result<CommandHandle, Error> {
        let handle = self.register()?;

        // type + request id + payload
        let len: u32 = (1 + 4 + buffer.len()).try_into()?;

        let mut packet = BytesMut::with_capacity(4 + len as usize);
        packet.put_u32(len);
        packet.put_u8(SSH_FXP_EXTENDED);
        packet.put_u32(handle.id);
        packet.put_slice(&buffer);

        // A single write so that concurrent requests are never interleaved.
        if let Err(err) = self.output.write_bytes(packet.freeze()).await {
            self.unregister(handle.id);
            return Err(err);
        }

        Ok(handle)
    }

    async fn receive(&self, handle: CommandHandle) -> Result<Bytes, Error> {
        handle.receiver.await.map_err(|_| Error::Cancelled)
    }
}

async fn read_replies(mut input: PipedInput, responses: Arc<Responses>) -> Result<(), Error> {
    // Drop every sender on exit, failing the outstanding requests.
    let _guard = scopeguard::guard((), |_| {
        responses.lock().take();
    });

    let mut buffer = BytesMut::new();

    loop {
        let len = match input.read_u32().await {
            Ok(len) => len as usize,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break Ok(()),
            Err(err) => break Err(err.into()),
        };

        // type + request id
        if len < 5 {
            break Err(Error::InvalidResponse(&"reply shorter than its header"));
        }

        buffer.clear();
        read_exact_to_bytes(&mut input, &mut buffer, len).await?;

        let packet = buffer.split();
        let packet_type = packet[0];
        let id = u32::from_be_bytes([packet[1], packet[2], packet[3], packet[4]]);

        // Strip the request id, the transport hands out `type | payload`.
        let mut reply = BytesMut::with_capacity(len - 4);
        reply.put_u8(packet_type);
        reply.put_slice(&packet[5..]);

        let sender = responses
            .lock()
            .as_mut()
            .and_then(|responses| responses.remove(&id));

        match sender {
            // The requester might have given up waiting.
            Some(sender) => drop(sender.send(reply.freeze())),
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(id, packet_type, "dropping reply to unknown request id");
            }
        }
    }
}
