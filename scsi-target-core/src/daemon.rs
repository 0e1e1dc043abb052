//! Host-bridge message-slot registration interface (§1, §6).
//!
//! The core exposes only the registration surface for host-bridge
//! GET/SEND MESSAGE channels; the network-bridge and filesystem-bridge
//! callbacks that actually answer them are external collaborators.

use std::collections::HashMap;

use crate::disk::MessageChannel;

/// One registered handler, keyed by the function byte (CDB byte 3,
/// range 0..7 per §4.6).
pub trait MessageHandler: Send {
    fn get_message(&mut self, phase: u8) -> Vec<u8>;
    fn send_message(&mut self, phase: u8, data: &[u8]);
}

/// Dispatches GET/SEND MESSAGE(10) to whichever handler is registered
/// for the requested function, implementing [`MessageChannel`] for
/// `Disk`.
#[derive(Default)]
pub struct MessageRegistry {
    handlers: HashMap<u8, Box<dyn MessageHandler>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: u8, handler: Box<dyn MessageHandler>) {
        self.handlers.insert(function, handler);
    }

    pub fn unregister(&mut self, function: u8) {
        self.handlers.remove(&function);
    }

    /// Eight ASCII `'0'`/`'1'` flags, one per function slot, for the
    /// host-bridge INQUIRY extension (§6).
    pub fn registered_flags(&self) -> [u8; 8] {
        let mut flags = [b'0'; 8];
        for function in self.handlers.keys() {
            if let Some(slot) = flags.get_mut(*function as usize) {
                *slot = b'1';
            }
        }
        flags
    }
}

impl MessageChannel for MessageRegistry {
    fn get_message(&mut self, function: u8, phase: u8) -> Vec<u8> {
        match self.handlers.get_mut(&function) {
            Some(handler) => handler.get_message(phase),
            None => Vec::new(),
        }
    }

    fn send_message(&mut self, function: u8, phase: u8, data: &[u8]) {
        if let Some(handler) = self.handlers.get_mut(&function) {
            handler.send_message(phase, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(Vec<u8>);

    impl MessageHandler for Echo {
        fn get_message(&mut self, _phase: u8) -> Vec<u8> {
            self.0.clone()
        }
        fn send_message(&mut self, _phase: u8, data: &[u8]) {
            self.0 = data.to_vec();
        }
    }

    #[test]
    fn unregistered_function_yields_empty_response() {
        let mut reg = MessageRegistry::new();
        assert!(reg.get_message(3, 0).is_empty());
    }

    #[test]
    fn registered_handler_round_trips_send_then_get() {
        let mut reg = MessageRegistry::new();
        reg.register(2, Box::new(Echo(Vec::new())));
        reg.send_message(2, 0, &[1, 2, 3]);
        assert_eq!(reg.get_message(2, 0), vec![1, 2, 3]);
    }

    #[test]
    fn registered_flags_mark_only_registered_functions() {
        let mut reg = MessageRegistry::new();
        reg.register(2, Box::new(Echo(Vec::new())));
        reg.register(5, Box::new(Echo(Vec::new())));
        let flags = reg.registered_flags();
        assert_eq!(flags, *b"00100100");
    }

    #[test]
    fn unregister_removes_the_handler() {
        let mut reg = MessageRegistry::new();
        reg.register(1, Box::new(Echo(vec![9])));
        reg.unregister(1);
        assert!(reg.get_message(1, 0).is_empty());
    }
}
