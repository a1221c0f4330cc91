//! Extension point invoked once the request channel exists

use std::sync::Arc;
use watchdog_core::RequestChannel;

/// Called right after the request channel is created, before any program is
/// spawned. Implementations typically hand the channel to a secondary
/// context that produces or consumes pid records. A consumer parked in
/// `recv` shares the read side with the loop's drain: each record goes to
/// whichever reader takes it first.
pub trait ChannelReady: Send {
    fn on_channel_ready(&self, channel: &Arc<RequestChannel>);
}

impl<F> ChannelReady for F
where
    F: Fn(&Arc<RequestChannel>) + Send,
{
    fn on_channel_ready(&self, channel: &Arc<RequestChannel>) {
        self(channel);
    }
}
