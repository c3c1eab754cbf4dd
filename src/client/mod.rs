//! Collaborators that talk to the outside world: the GraphQL transport and ENS lookups.

mod ens;
mod graphql;

pub use ens::{EnsResolver, NameResolver};
pub use graphql::{GraphQLClient, QueryClient, DEFAULT_QUERY_TIMEOUT};
