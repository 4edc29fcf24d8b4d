//! Mock implementations for testing
//!
//! This module provides mock implementations of the platform traits for use
//! in unit and integration tests across the workspace.

#![cfg(any(test, feature = "std"))]

use std::collections::VecDeque;

use crate::{ByteTransport, FatalSink, PeriodicInterrupt, RefillProbe, IDLE_BYTE};

/// Fatal sink that records every error and returns.
#[derive(Debug)]
pub struct RecordingSink<E> {
    errors: Vec<E>,
}

impl<E> RecordingSink<E> {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Errors received so far, oldest first.
    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    /// `true` if no error has been reported.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E> Default for RecordingSink<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> FatalSink<E> for RecordingSink<E> {
    fn fatal(&mut self, error: E) {
        self.errors.push(error);
    }
}

/// Interrupt source that only tracks its enable state.
#[derive(Debug, Default)]
pub struct MockInterrupt {
    enabled: bool,
    enable_count: usize,
    disable_count: usize,
}

impl MockInterrupt {
    /// Create a disabled interrupt source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the source is currently firing.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of `enable()` calls.
    pub fn enable_count(&self) -> usize {
        self.enable_count
    }

    /// Number of `disable()` calls.
    pub fn disable_count(&self) -> usize {
        self.disable_count
    }
}

impl PeriodicInterrupt for MockInterrupt {
    fn enable(&mut self) {
        self.enabled = true;
        self.enable_count = self.enable_count.saturating_add(1);
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.disable_count = self.disable_count.saturating_add(1);
    }
}

/// Probe that counts refill brackets and checks they nest correctly.
#[derive(Debug, Default)]
pub struct CountingProbe {
    active: bool,
    completed: usize,
    unbalanced: bool,
}

impl CountingProbe {
    /// Create an idle probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `begin`/`end` pairs seen.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// `true` if `begin` and `end` ever arrived out of order.
    pub fn unbalanced(&self) -> bool {
        self.unbalanced
    }
}

impl RefillProbe for CountingProbe {
    fn begin(&mut self) {
        self.unbalanced |= self.active;
        self.active = true;
    }

    fn end(&mut self) {
        self.unbalanced |= !self.active;
        self.active = false;
        self.completed = self.completed.saturating_add(1);
    }
}

/// One observable event on a [`ScriptedTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Chip select asserted.
    Select,
    /// Chip select deasserted.
    Deselect,
    /// A byte exchange: what the host sent and what it got back.
    Exchange {
        /// Byte clocked out by the host.
        sent: u8,
        /// Byte clocked in by the host.
        received: u8,
    },
}

/// Transport that answers from a fixed script and logs every bus event.
///
/// Once the script runs dry every exchange returns [`IDLE_BYTE`], which is
/// what a card that is not talking drives onto the line.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: VecDeque<u8>,
    events: Vec<BusEvent>,
    selected: bool,
}

impl ScriptedTransport {
    /// Create a transport that will answer with `responses` in order.
    pub fn new(responses: impl IntoIterator<Item = u8>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            events: Vec::new(),
            selected: false,
        }
    }

    /// Append more responses to the script.
    pub fn queue(&mut self, responses: impl IntoIterator<Item = u8>) {
        self.responses.extend(responses);
    }

    /// Every event so far.
    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    /// Bytes sent by the host, in order.
    pub fn sent(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Exchange { sent, .. } => Some(*sent),
                _ => None,
            })
            .collect()
    }

    /// Number of script bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.len()
    }

    /// Whether chip select is currently asserted.
    pub fn is_selected(&self) -> bool {
        self.selected
    }
}

impl ByteTransport for ScriptedTransport {
    type Error = core::convert::Infallible;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let received = self.responses.pop_front().unwrap_or(IDLE_BYTE);
        self.events.push(BusEvent::Exchange {
            sent: byte,
            received,
        });
        Ok(received)
    }

    fn select(&mut self) -> Result<(), Self::Error> {
        self.selected = true;
        self.events.push(BusEvent::Select);
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        self.selected = false;
        self.events.push(BusEvent::Deselect);
        Ok(())
    }
}
