pub mod router;

pub use router::{
    default_routes, load_routes_from_file, save_routes_to_file, strip_route_prefix, Route,
    RouteTable,
};
