pub mod cluster;
pub mod node;
pub mod routes;

/*
    Every node is its own HTTP service on base_port + node_id. Peers only
    ever read each other through GET /getState; start, stop and status
    are driven by an operator or a launcher. Nothing is authenticated and
    nothing survives a restart.
*/
