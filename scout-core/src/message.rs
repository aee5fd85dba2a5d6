//! Marker for values that travel between tasks.

/// Anything carried over a channel or queue between orchestration tasks.
///
/// Messages must be `Send + 'static` so they can cross task boundaries.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a valid Message",
    label = "must be `Send + 'static`",
    note = "Values queued between scout tasks must be movable across threads."
)]
pub trait Message: Send + 'static {}

impl Message for String {}
impl Message for crate::event::Event {}
impl Message for crate::request::Request {}
impl<T: Message + Sync> Message for std::sync::Arc<T> {}
impl<T: Message> Message for Box<T> {}
