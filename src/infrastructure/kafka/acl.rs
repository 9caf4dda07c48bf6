use kafka_protocol::messages::DescribeAclsRequest;
use tracing::debug;

use crate::domain::acl::{
    operation_name, pattern_type_name, permission_type_name, resource_type_name, Acl,
};
use crate::error::{KafkaError, KafkaResult};
use crate::infrastructure::kafka::session::AdminSession;

/// Filter code matching every value of the field.
const ANY: i8 = 1;

/// All ACL bindings on the cluster, sorted.
pub async fn describe_acls(session: &mut AdminSession) -> KafkaResult<Vec<Acl>> {
    let version = session.version_for::<DescribeAclsRequest>("DescribeAcls")?;
    let mut request = DescribeAclsRequest::default()
        .with_resource_type_filter(ANY)
        .with_resource_name_filter(None)
        .with_principal_filter(None)
        .with_host_filter(None)
        .with_operation(ANY)
        .with_permission_type(ANY);
    // Pattern types arrived in v1; v0 only knows literal bindings.
    if version >= 1 {
        request = request.with_pattern_type_filter(ANY);
    }

    let response = session.send(&request, version).await?;
    if response.error_code != 0 {
        return Err(KafkaError::Broker {
            operation: "DescribeAcls",
            resource: session.address().to_string(),
            code: response.error_code,
            message: response
                .error_message
                .map(|m| m.to_string())
                .unwrap_or_default(),
        });
    }

    let mut acls: Vec<Acl> = response
        .resources
        .iter()
        .flat_map(|resource| {
            resource.acls.iter().map(move |acl| Acl {
                resource_type: resource_type_name(resource.resource_type),
                resource_name: resource.resource_name.to_string(),
                resource_pattern_type: pattern_type_name(resource.pattern_type),
                principal: acl.principal.to_string(),
                host: acl.host.to_string(),
                operation: operation_name(acl.operation),
                permission_type: permission_type_name(acl.permission_type),
            })
        })
        .collect();
    acls.sort();
    debug!(acls = acls.len(), "described acls");
    Ok(acls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::error::ErrorClass;
    use crate::infrastructure::kafka::mock_broker::{MockAcl, MockBroker, MockCluster};
    use crate::infrastructure::kafka::session::{SaslCredentials, SessionConnector, Transport};

    fn acl(name: &str, principal: &str) -> MockAcl {
        MockAcl {
            resource_type: 2,
            resource_name: name.to_string(),
            pattern_type: 3,
            principal: principal.to_string(),
            host: "*".to_string(),
            operation: 3,
            permission_type: 3,
        }
    }

    async fn describe(cluster: MockCluster) -> KafkaResult<Vec<Acl>> {
        let broker = MockBroker::start(cluster).await;
        let connector =
            SessionConnector::new(Transport::Plain, SaslCredentials::None, &NetworkConfig::default());
        let mut session = connector.open(&broker.address).await?;
        let result = describe_acls(&mut session).await;
        session.close().await;
        result
    }

    #[tokio::test]
    async fn test_acls_are_named_and_sorted() {
        let acls = describe(MockCluster {
            acls: vec![acl("payments", "User:b"), acl("orders", "User:a")],
            ..MockCluster::default()
        })
        .await
        .unwrap();

        assert_eq!(acls.len(), 2);
        assert_eq!(acls[0].resource_name, "orders");
        assert_eq!(acls[0].resource_type, "Topic");
        assert_eq!(acls[0].resource_pattern_type, "Literal");
        assert_eq!(acls[0].operation, "Read");
        assert_eq!(acls[0].permission_type, "Allow");
    }

    #[tokio::test]
    async fn test_missing_authorizer_is_unsupported() {
        let err = describe(MockCluster {
            acl_error: Some((-1, "No Authorizer is configured on the broker".to_string())),
            ..MockCluster::default()
        })
        .await
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unsupported);
    }

    #[tokio::test]
    async fn test_authorization_failure_is_fatal() {
        // CLUSTER_AUTHORIZATION_FAILED
        let err = describe(MockCluster {
            acl_error: Some((31, "Cluster authorization failed.".to_string())),
            ..MockCluster::default()
        })
        .await
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
