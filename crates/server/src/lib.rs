pub mod dedupe;
pub mod gateway;
pub mod webhook;
