use crate::template::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CIDR_ANY_V4: &str = "0.0.0.0/0";
pub const CIDR_ANY_V6: &str = "::/0";

/// Resource classification used for edge construction and rule selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Function,
    Role,
    Policy,
    SecurityGroup,
    Subnet,
    RouteTable,
    VpcEndpoint,
    InternetGateway,
    NatGateway,
    /// Placeholder for an id defined outside the document (e.g. `sg-0abc`).
    External,
    Other,
}

impl ResourceKind {
    pub fn from_type(type_name: &str) -> Self {
        match type_name {
            "AWS::Serverless::Function" | "AWS::Lambda::Function" => ResourceKind::Function,
            "AWS::IAM::Role" => ResourceKind::Role,
            "AWS::IAM::Policy" | "AWS::IAM::ManagedPolicy" => ResourceKind::Policy,
            "AWS::EC2::SecurityGroup" => ResourceKind::SecurityGroup,
            "AWS::EC2::Subnet" => ResourceKind::Subnet,
            "AWS::EC2::RouteTable" => ResourceKind::RouteTable,
            "AWS::EC2::VPCEndpoint" => ResourceKind::VpcEndpoint,
            "AWS::EC2::InternetGateway" => ResourceKind::InternetGateway,
            "AWS::EC2::NatGateway" => ResourceKind::NatGateway,
            _ => ResourceKind::Other,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ResourceKind::Function => "function",
            ResourceKind::Role => "role",
            ResourceKind::Policy => "policy",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::VpcEndpoint => "vpc-endpoint",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::NatGateway => "nat-gateway",
            ResourceKind::External => "external",
            ResourceKind::Other => "other",
        }
    }
}

/// A single security-group rule, egress or ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub cidr: String,
    pub protocol: String,
    pub from_port: Option<String>,
    pub to_port: Option<String>,
}

impl SecurityGroupRule {
    pub fn from_value(value: &PropertyValue) -> Option<Self> {
        let map = value.as_map()?;
        let text = |key: &str| map.get(key).map(PropertyValue::render);
        let cidr = text("CidrIp")
            .or_else(|| text("CidrIpv6"))
            .or_else(|| text("DestinationPrefixListId"))
            .or_else(|| text("DestinationSecurityGroupId"))
            .or_else(|| text("SourceSecurityGroupId"))
            .unwrap_or_default();
        Some(Self {
            cidr,
            protocol: text("IpProtocol").unwrap_or_else(|| "-1".to_string()),
            from_port: text("FromPort"),
            to_port: text("ToPort"),
        })
    }

    pub fn is_unrestricted_destination(&self) -> bool {
        self.cidr == CIDR_ANY_V4 || self.cidr == CIDR_ANY_V6
    }

    pub fn is_all_protocols(&self) -> bool {
        matches!(self.protocol.to_ascii_lowercase().as_str(), "-1" | "all")
    }
}

/// Classified next hop of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "kebab-case")]
pub enum RouteTarget {
    InternetGateway(String),
    NatGateway(String),
    VpcEndpoint(String),
    TransitGateway(String),
    Local,
    Other(String),
}

/// One route-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: String,
    pub target: RouteTarget,
}

impl RouteEntry {
    /// Parse a route. `local_kind` reports the kind of a next hop defined in
    /// the same document, so a `GatewayId` is only an internet gateway when
    /// it points at one.
    pub fn from_properties(
        props: &BTreeMap<String, PropertyValue>,
        local_kind: impl Fn(&str) -> Option<ResourceKind>,
    ) -> Option<Self> {
        let destination = props
            .get("DestinationCidrBlock")
            .or_else(|| props.get("DestinationIpv6CidrBlock"))?
            .render();
        let id = |key: &str| props.get(key).map(reference_id);

        let target = if let Some(gw) = id("GatewayId") {
            let kind = local_kind(&gw);
            gateway_target(gw, kind)
        } else if let Some(gw) = id("EgressOnlyInternetGatewayId") {
            RouteTarget::InternetGateway(gw)
        } else if let Some(nat) = id("NatGatewayId") {
            RouteTarget::NatGateway(nat)
        } else if let Some(vpce) = id("VpcEndpointId") {
            RouteTarget::VpcEndpoint(vpce)
        } else if let Some(tgw) = id("TransitGatewayId") {
            RouteTarget::TransitGateway(tgw)
        } else {
            RouteTarget::Other(String::new())
        };

        Some(Self { destination, target })
    }

    pub fn is_default_route(&self) -> bool {
        self.destination == CIDR_ANY_V4 || self.destination == CIDR_ANY_V6
    }
}

/// Classify a `GatewayId` next hop. Document resources are classified by
/// kind, literal ids by their provider prefix. VPN and other gateways are
/// never internet routes.
fn gateway_target(id: String, kind: Option<ResourceKind>) -> RouteTarget {
    match kind {
        Some(ResourceKind::InternetGateway) => RouteTarget::InternetGateway(id),
        Some(ResourceKind::NatGateway) => RouteTarget::NatGateway(id),
        Some(ResourceKind::VpcEndpoint) => RouteTarget::VpcEndpoint(id),
        Some(_) => RouteTarget::Other(id),
        None if id == "local" => RouteTarget::Local,
        None if id.starts_with("igw-") => RouteTarget::InternetGateway(id),
        None if id.starts_with("nat-") => RouteTarget::NatGateway(id),
        None if id.starts_with("vpce-") => RouteTarget::VpcEndpoint(id),
        None if id.starts_with("tgw-") => RouteTarget::TransitGateway(id),
        None => RouteTarget::Other(id),
    }
}

/// Network evidence attached directly to a resource rather than expressed as edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEvidence {
    pub egress: Vec<SecurityGroupRule>,
    pub ingress: Vec<SecurityGroupRule>,
    pub routes: Vec<RouteEntry>,
}

/// A resolved resource node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    pub type_name: String,
    pub properties: BTreeMap<String, PropertyValue>,
    pub network: NetworkEvidence,
}

impl Resource {
    pub fn new(id: &str, type_name: &str, properties: BTreeMap<String, PropertyValue>) -> Self {
        Self {
            id: id.to_string(),
            kind: ResourceKind::from_type(type_name),
            type_name: type_name.to_string(),
            properties,
            network: NetworkEvidence::default(),
        }
    }

    /// Placeholder node for an id defined outside the document.
    pub fn external(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ResourceKind::External,
            type_name: "External".to_string(),
            properties: BTreeMap::new(),
            network: NetworkEvidence::default(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn property_path(&self, path: &[&str]) -> Option<&PropertyValue> {
        let (first, rest) = path.split_first()?;
        self.properties.get(*first)?.get_path(rest)
    }

    pub fn is_serverless_function(&self) -> bool {
        self.type_name == "AWS::Serverless::Function"
    }
}

/// Id text for a value used as a resource pointer.
pub fn reference_id(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Reference { target, .. } => target.clone(),
        other => other.render(),
    }
}
