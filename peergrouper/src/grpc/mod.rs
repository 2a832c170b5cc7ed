mod replicaset;

pub use replicaset::replica_set_admin_client::ReplicaSetAdminClient;
pub use replicaset::*;
