//! Runtime options for the realtime client.

use std::time::Duration;

/// Default values used by [`RealtimeOptions::default`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RealtimeDefaults;

impl RealtimeDefaults {
    /// Default first reconnect delay.
    pub const MIN_BACKOFF: Duration = Duration::from_millis(500);
    /// Default reconnect delay ceiling.
    pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
    /// Default maximum jitter per reconnect delay.
    pub const BACKOFF_JITTER: Duration = Duration::from_millis(250);
    /// The backend heartbeats well inside this; silence past it means the
    /// connection is dead even if the socket is still open.
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);
    /// Default streaming time after which the backoff starts over.
    pub const STABLE_AFTER: Duration = Duration::from_secs(30);
    /// Default number of event ids remembered for dedup.
    pub const DEDUP_WINDOW: usize = 2_048;
    /// Default largest buffered line or frame.
    pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
    /// Default connect timeout for every outbound request.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default lifetime assumed for a fresh session.
    pub const SESSION_LIFETIME: Duration = Duration::from_secs(6 * 60 * 60);
    /// Default margin before expiry at which sessions are renewed.
    pub const RENEW_SKEW: Duration = Duration::from_secs(60);
    /// Default body chunks buffered per connection.
    pub const CHUNK_BUFFER: usize = 64;
    /// Default unread notices kept before new ones are dropped.
    pub const NOTICE_BUFFER: usize = 256;
    /// Default unread state transitions kept before new ones are dropped.
    pub const STATUS_BUFFER: usize = 256;
}

/// Tunables for the stream supervisor, decoder, and dispatcher.
#[derive(Clone, Debug)]
pub struct RealtimeOptions {
    /// First reconnect delay; also the delay after a stable period.
    pub min_backoff: Duration,
    /// Ceiling for any reconnect delay, jitter included.
    pub max_backoff: Duration,
    /// Maximum random jitter added to each reconnect delay.
    pub backoff_jitter: Duration,
    /// A connection with no complete frame for this long is treated as dead.
    pub idle_timeout: Duration,
    /// Streaming at least this long resets the backoff to `min_backoff`.
    pub stable_after: Duration,
    /// Whether the backend honours `Last-Event-ID` on reconnect.
    pub resume_supported: bool,
    /// Number of recent event ids remembered for dedup.
    pub dedup_window: usize,
    /// Largest line or frame the decoder will buffer.
    pub max_frame_bytes: usize,
    /// TCP/TLS connect timeout for the stream and auth requests.
    pub connect_timeout: Duration,
    /// Lifetime assumed for a freshly authenticated or renewed session.
    pub session_lifetime: Duration,
    /// Sessions expiring within this margin are renewed before connecting.
    pub renew_skew: Duration,
    /// Number of body chunks buffered between the reader task and decoder.
    pub chunk_buffer: usize,
    /// Unread notices kept for the application.
    pub notice_buffer: usize,
    /// Unread state transitions kept for the application.
    pub status_buffer: usize,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            min_backoff: RealtimeDefaults::MIN_BACKOFF,
            max_backoff: RealtimeDefaults::MAX_BACKOFF,
            backoff_jitter: RealtimeDefaults::BACKOFF_JITTER,
            idle_timeout: RealtimeDefaults::IDLE_TIMEOUT,
            stable_after: RealtimeDefaults::STABLE_AFTER,
            resume_supported: false,
            dedup_window: RealtimeDefaults::DEDUP_WINDOW,
            max_frame_bytes: RealtimeDefaults::MAX_FRAME_BYTES,
            connect_timeout: RealtimeDefaults::CONNECT_TIMEOUT,
            session_lifetime: RealtimeDefaults::SESSION_LIFETIME,
            renew_skew: RealtimeDefaults::RENEW_SKEW,
            chunk_buffer: RealtimeDefaults::CHUNK_BUFFER,
            notice_buffer: RealtimeDefaults::NOTICE_BUFFER,
            status_buffer: RealtimeDefaults::STATUS_BUFFER,
        }
    }
}

impl RealtimeOptions {
    /// Sets the first and the largest reconnect delay.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max;
        self
    }

    /// Sets the maximum random jitter added to each reconnect delay.
    pub fn with_backoff_jitter(mut self, jitter: Duration) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    /// Sets how long a connection may go without a frame.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the streaming time after which the backoff starts over.
    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    /// Declares whether the backend honours `Last-Event-ID`.
    pub fn with_resume_supported(mut self, resume_supported: bool) -> Self {
        self.resume_supported = resume_supported;
        self
    }

    /// Sets how many recent event ids are remembered for dedup.
    pub fn with_dedup_window(mut self, dedup_window: usize) -> Self {
        self.dedup_window = dedup_window;
        self
    }

    /// Sets the largest line or frame the decoder buffers.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Sets how many unread notices are kept.
    pub fn with_notice_buffer(mut self, notice_buffer: usize) -> Self {
        self.notice_buffer = notice_buffer;
        self
    }

    /// Sets how many unread state transitions are kept.
    pub fn with_status_buffer(mut self, status_buffer: usize) -> Self {
        self.status_buffer = status_buffer;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RealtimeDefaults, RealtimeOptions};

    #[test]
    fn defaults_assume_no_resume_support() {
        let options = RealtimeOptions::default();
        assert!(!options.resume_supported);
        assert_eq!(options.dedup_window, RealtimeDefaults::DEDUP_WINDOW);
        assert!(options.min_backoff <= options.max_backoff);
    }

    #[test]
    fn builders_override_selected_fields() {
        let options = RealtimeOptions::default()
            .with_backoff(Duration::from_millis(5), Duration::from_millis(50))
            .with_resume_supported(true)
            .with_dedup_window(8);
        assert_eq!(options.min_backoff, Duration::from_millis(5));
        assert_eq!(options.max_backoff, Duration::from_millis(50));
        assert!(options.resume_supported);
        assert_eq!(options.dedup_window, 8);
        assert_eq!(options.idle_timeout, RealtimeDefaults::IDLE_TIMEOUT);
    }
}
