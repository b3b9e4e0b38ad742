//! Typed request and event descriptors.
//!
//! A descriptor binds a method name to its parameter and result types so
//! that handler registration and outgoing calls are checked at compile time.

use std::marker::PhantomData;

use super::capabilities::{
    CapabilitiesRequest, CapabilitiesResult, InitializeParams, InitializeResult,
};

pub struct RequestType<P, R> {
    method: &'static str,
    _marker: PhantomData<fn(P) -> R>,
}

impl<P, R> RequestType<P, R> {
    pub const fn new(method: &'static str) -> Self {
        Self {
            method,
            _marker: PhantomData,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }
}

impl<P, R> Clone for RequestType<P, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, R> Copy for RequestType<P, R> {}

impl<P, R> std::fmt::Debug for RequestType<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RequestType").field(&self.method).finish()
    }
}

pub struct EventType<P> {
    method: &'static str,
    _marker: PhantomData<fn(P)>,
}

impl<P> EventType<P> {
    pub const fn new(method: &'static str) -> Self {
        Self {
            method,
            _marker: PhantomData,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }
}

impl<P> Clone for EventType<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for EventType<P> {}

impl<P> std::fmt::Debug for EventType<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventType").field(&self.method).finish()
    }
}

pub const INITIALIZE: RequestType<InitializeParams, InitializeResult> =
    RequestType::new("initialize");
pub const SHUTDOWN: RequestType<(), ()> = RequestType::new("shutdown");
pub const EXIT: EventType<()> = EventType::new("exit");
pub const VERSION: RequestType<(), String> = RequestType::new("version");
pub const CAPABILITIES: RequestType<CapabilitiesRequest, CapabilitiesResult> =
    RequestType::new("capabilities/list");
