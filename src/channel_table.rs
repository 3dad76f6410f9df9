use super::{
    Channel, ChannelOptions, ChannelSink, Error, PipedInput, PipedOutput, RemoteParams,
};

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

/// Inbound channel frame, already decoded by the transport layer.
///
/// `recipient` is always the local channel id.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ChannelMessage {
    Data { recipient: u32, data: Bytes },
    Eof { recipient: u32 },
    Close { recipient: u32 },
    WindowAdjust { recipient: u32, bytes_to_add: u32 },
}

impl ChannelMessage {
    pub fn recipient(&self) -> u32 {
        match self {
            ChannelMessage::Data { recipient, .. }
            | ChannelMessage::Eof { recipient }
            | ChannelMessage::Close { recipient }
            | ChannelMessage::WindowAdjust { recipient, .. } => *recipient,
        }
    }
}

#[derive(Debug)]
struct Slots<S: ChannelSink + 'static> {
    channels: HashMap<u32, Arc<Channel<S>>>,
    next_id: u32,
}

/// The channels of one session, indexed by local id.
///
/// This is the only place local channel ids are allocated and released.
#[derive(Debug)]
pub struct ChannelTable<S: ChannelSink + 'static> {
    slots: Mutex<Slots<S>>,
    options: ChannelOptions,
}

impl<S: ChannelSink + 'static> Default for ChannelTable<S> {
    fn default() -> Self {
        Self::new(ChannelOptions::default())
    }
}

impl<S: ChannelSink + 'static> ChannelTable<S> {
    pub fn new(options: ChannelOptions) -> Self {
        Self {
            slots: Mutex::new(Slots {
                channels: HashMap::new(),
                next_id: 0,
            }),
            options,
        }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Allocate a local id and open a channel on it.
    pub fn open(
        &self,
        remote: RemoteParams,
        sink: S,
    ) -> Result<(Arc<Channel<S>>, PipedOutput<S>, PipedInput), Error> {
        let mut slots = self.slots.lock();

        if slots.channels.len() > u32::MAX as usize {
            return Err(Error::ChannelIdsExhausted);
        }

        // Ids are handed out round robin so that a recently closed id is not
        // reused while the peer may still send frames for it.
        let mut local_id = slots.next_id;
        while slots.channels.contains_key(&local_id) {
            local_id = local_id.wrapping_add(1);
        }
        slots.next_id = local_id.wrapping_add(1);

        let (channel, output, input) = Channel::open(local_id, remote, &self.options, sink);
        let channel = Arc::new(channel);

        slots.channels.insert(local_id, Arc::clone(&channel));

        Ok((channel, output, input))
    }

    pub fn get(&self, local_id: u32) -> Option<Arc<Channel<S>>> {
        self.slots.lock().channels.get(&local_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down the channel and release its local id.
    pub fn remove(&self, local_id: u32) -> Option<Arc<Channel<S>>> {
        let channel = self.slots.lock().channels.remove(&local_id)?;
        channel.teardown();
        Some(channel)
    }

    /// Route an inbound frame to its channel.
    ///
    /// A protocol violation on a channel tears that channel down and
    /// releases its id before the error is returned; other channels are
    /// not affected.
    pub fn dispatch(&self, message: ChannelMessage) -> Result<(), Error> {
        let id = message.recipient();
        let channel = self.get(id).ok_or(Error::UnknownChannel { id })?;

        let res = match message {
            ChannelMessage::Data { data, .. } => channel.handle_data(data),
            ChannelMessage::Eof { .. } => channel.handle_eof(),
            ChannelMessage::WindowAdjust { bytes_to_add, .. } => {
                channel.handle_window_adjust(bytes_to_add)
            }
            ChannelMessage::Close { .. } => {
                self.remove(id);
                Ok(())
            }
        };

        if res.is_err() {
            self.remove(id);
        }

        res
    }

    /// Tear down every channel, e.g. because the session died.
    pub fn close_all(&self) {
        let channels: Vec<_> = self.slots.lock().channels.drain().collect();

        for (_id, channel) in channels {
            channel.teardown();
        }
    }
}
