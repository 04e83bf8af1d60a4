/*
This crate is home to the connectivity lifecycle of the device.

It takes the device from an idle network interface to a usable network
session, applying a bounded retry policy to link losses, and exposes the
resulting state to the rest of the agent as a read-only readiness signal.
*/

mod manager;
mod stack;
mod state;
mod wpa;

pub use manager::{ConnectionOutcome, ConnectivityError, ConnectivityManager, Readiness};
pub use stack::{
    AuthMode, Credentials, DisconnectReason, InvalidAuthMode, LinkEvent, NetworkStack, StackError,
};
pub use state::{Action, ConnectionState, Connectivity};
pub use wpa::{WpaConfig, WpaStation};
