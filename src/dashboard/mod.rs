mod handlers;
mod server;

pub use server::{DashboardServer, DashboardState};
