pub mod models;
pub mod schema;
pub mod store;

pub mod queries {
    pub mod bots;
    pub mod proxy_endpoints;
    pub mod sessions;
}

pub use schema::init_schema;
pub use store::PgEndpointStore;
