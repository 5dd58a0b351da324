//! ACI deployment target description.

use nimbus_common::context::AciContextData;

/// Deployment target for the ACI backend: which subscription, resource
/// group, and region container groups are created in.
pub type AciContext = AciContextData;
