mod lifecycle;

pub use lifecycle::SessionState;
