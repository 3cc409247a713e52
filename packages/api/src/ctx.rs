use flywheel_cluster::ClusterNode;
use flywheel_runtime::Runtime;

/// State shared by every endpoint: the cluster dispatch for routed
/// operations and the local runtime for node-local reads.
#[derive(Clone)]
pub struct ApiCtx {
	pub cluster: ClusterNode,
	pub runtime: Runtime,
}

impl ApiCtx {
	pub fn new(cluster: ClusterNode, runtime: Runtime) -> Self {
		ApiCtx { cluster, runtime }
	}
}
