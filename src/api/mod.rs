pub mod breadth_handlers;
pub mod doc;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
