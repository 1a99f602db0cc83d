/// A generic listener type that can be invoked multiple times
pub trait Listener<T>: Send {
    /// inform the listener that the value has changed
    fn update(&mut self, value: T);
}

/// Listener that does nothing
#[derive(Copy, Clone)]
pub(crate) struct NullListener;

impl NullListener {
    /// create a Box<dyn Listener<T>> that does nothing
    pub(crate) fn create<T>() -> Box<dyn Listener<T>> {
        Box::new(NullListener)
    }
}

impl<T> Listener<T> for NullListener {
    fn update(&mut self, _value: T) {}
}

/// State of the client connection, delivered to the channel's state listener
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// client is disabled, requests are discarded
    Disabled,
    /// client is attempting to establish a connection or open the port
    Connecting,
    /// client is connected, requests are processed
    Connected,
    /// a connection attempt failed, the client waits before trying again
    WaitAfterFailedConnect(std::time::Duration),
    /// the connection was lost, the client waits before reconnecting
    WaitAfterDisconnect(std::time::Duration),
    /// client task has been shut down
    Shutdown,
}
