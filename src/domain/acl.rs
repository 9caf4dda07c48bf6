use serde::{Deserialize, Serialize};

/// One ACL binding as reported by DescribeAcls.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "PascalCase")]
pub struct Acl {
    pub resource_type: String,
    pub resource_name: String,
    pub resource_pattern_type: String,
    pub principal: String,
    pub host: String,
    pub operation: String,
    pub permission_type: String,
}

pub fn resource_type_name(code: i8) -> String {
    match code {
        1 => "Any",
        2 => "Topic",
        3 => "Group",
        4 => "Cluster",
        5 => "TransactionalID",
        6 => "DelegationToken",
        7 => "User",
        _ => return format!("Unknown({code})"),
    }
    .to_string()
}

pub fn pattern_type_name(code: i8) -> String {
    match code {
        1 => "Any",
        2 => "Match",
        3 => "Literal",
        4 => "Prefixed",
        _ => return format!("Unknown({code})"),
    }
    .to_string()
}

pub fn operation_name(code: i8) -> String {
    match code {
        1 => "Any",
        2 => "All",
        3 => "Read",
        4 => "Write",
        5 => "Create",
        6 => "Delete",
        7 => "Alter",
        8 => "Describe",
        9 => "ClusterAction",
        10 => "DescribeConfigs",
        11 => "AlterConfigs",
        12 => "IdempotentWrite",
        13 => "CreateTokens",
        14 => "DescribeTokens",
        _ => return format!("Unknown({code})"),
    }
    .to_string()
}

pub fn permission_type_name(code: i8) -> String {
    match code {
        1 => "Any",
        2 => "Deny",
        3 => "Allow",
        _ => return format!("Unknown({code})"),
    }
    .to_string()
}
