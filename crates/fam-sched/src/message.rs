//! Owned messages passed between tasks

use std::any::Any;
use std::fmt;

/// A type-erased value sent to a handle.
///
/// The receiver recovers the concrete type with [`Message::downcast`].
pub struct Message(Box<dyn Any + Send>);

impl Message {
    /// Wrap a value
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// True if the payload is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Borrow the payload as a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Take the payload as a `T`, or get the message back unchanged
    pub fn downcast<T: Any>(self) -> Result<T, Message> {
        self.0.downcast::<T>().map(|b| *b).map_err(Message)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Message { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let msg = Message::new(42u32);
        assert!(msg.is::<u32>());
        assert_eq!(msg.downcast_ref::<u32>(), Some(&42));

        let msg = msg.downcast::<String>().unwrap_err();
        assert_eq!(msg.downcast::<u32>().unwrap(), 42);
    }
}
