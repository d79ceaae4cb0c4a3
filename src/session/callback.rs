//! Host notifications

use super::Session;

/// Receives session notifications on the host's consumer context
///
/// Every method has an empty default body so hosts implement only what they
/// need. Calls are made from [`Session::process_pending`] and friends, never
/// from worker threads, and never concurrently.
pub trait SessionCallback {
    /// New output was applied to the screen
    fn on_text_changed(&mut self, _session: &Session) {}

    /// The child set the window title
    fn on_title_changed(&mut self, _session: &Session) {}

    /// The child exited and the session is now finished
    fn on_session_finished(&mut self, _session: &Session) {}

    /// The child asked to place `text` on the clipboard
    fn on_clipboard_text(&mut self, _session: &Session, _text: &str) {}

    /// The child rang the bell
    fn on_bell(&mut self, _session: &Session) {}

    /// The palette or default colors changed
    fn on_colors_changed(&mut self, _session: &Session) {}
}

/// No notifications
impl SessionCallback for () {}
