use crate::error::Result;
use crate::graph::resource::{
    NetworkEvidence, Resource, ResourceKind, RouteEntry, SecurityGroupRule,
};
use crate::graph::{Relation, ResourceGraph};
use crate::template::value::PropertyValue;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A resource after intrinsic resolution, before it becomes a graph node.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub id: String,
    pub type_name: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Route properties that name the next hop, in precedence order.
const ROUTE_TARGET_KEYS: &[&str] = &[
    "GatewayId",
    "EgressOnlyInternetGatewayId",
    "NatGatewayId",
    "VpcEndpointId",
    "TransitGatewayId",
];

/// Build the resource graph: nodes first, then edges by fixed per-kind rules.
pub fn build(source_file: &str, resolved: Vec<ResolvedResource>) -> Result<ResourceGraph> {
    let ids: BTreeSet<String> = resolved.iter().map(|r| r.id.clone()).collect();
    let kinds: BTreeMap<&str, ResourceKind> = resolved
        .iter()
        .map(|r| (r.id.as_str(), ResourceKind::from_type(&r.type_name)))
        .collect();
    let mut evidence = collect_network_evidence(&resolved, &ids, &kinds);

    let mut graph = ResourceGraph::new(source_file.to_string());
    for r in &resolved {
        let mut resource = Resource::new(&r.id, &r.type_name, r.properties.clone());
        if let Some(network) = evidence.remove(&r.id) {
            resource.network = network;
        }
        graph.add_resource(resource);
    }

    for r in &resolved {
        derive_edges(&mut graph, r, &ids)?;
    }

    debug!(
        resources = graph.resource_count(),
        edges = graph.edge_count(),
        "resource graph built"
    );
    Ok(graph)
}

/// Fold security-group rules and routes into the group/table they belong to.
fn collect_network_evidence(
    resolved: &[ResolvedResource],
    ids: &BTreeSet<String>,
    kinds: &BTreeMap<&str, ResourceKind>,
) -> BTreeMap<String, NetworkEvidence> {
    let mut evidence: BTreeMap<String, NetworkEvidence> = BTreeMap::new();
    let kind_of = |id: &str| kinds.get(id).copied();

    for r in resolved {
        match r.type_name.as_str() {
            "AWS::EC2::SecurityGroup" => {
                let entry = evidence.entry(r.id.clone()).or_default();
                entry
                    .egress
                    .extend(parse_rules(r.properties.get("SecurityGroupEgress")));
                entry
                    .ingress
                    .extend(parse_rules(r.properties.get("SecurityGroupIngress")));
            }
            "AWS::EC2::SecurityGroupEgress" | "AWS::EC2::SecurityGroupIngress" => {
                let Some(group) = r.properties.get("GroupId").and_then(|v| local_id(v, ids))
                else {
                    continue;
                };
                let Some(rule) =
                    SecurityGroupRule::from_value(&PropertyValue::Map(r.properties.clone()))
                else {
                    continue;
                };
                let entry = evidence.entry(group).or_default();
                if r.type_name.ends_with("Egress") {
                    entry.egress.push(rule);
                } else {
                    entry.ingress.push(rule);
                }
            }
            "AWS::EC2::Route" => {
                let Some(table) = r
                    .properties
                    .get("RouteTableId")
                    .and_then(|v| local_id(v, ids))
                else {
                    continue;
                };
                if let Some(route) = RouteEntry::from_properties(&r.properties, kind_of) {
                    evidence.entry(table).or_default().routes.push(route);
                }
            }
            "AWS::EC2::RouteTable" => {
                // Inline routes are not part of the resource type, but tolerate them.
                if let Some(routes) = r.properties.get("Routes") {
                    let entry = evidence.entry(r.id.clone()).or_default();
                    for route in routes.items() {
                        if let Some(map) = route.as_map() {
                            entry.routes.extend(RouteEntry::from_properties(map, kind_of));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    evidence
}

fn parse_rules(value: Option<&PropertyValue>) -> Vec<SecurityGroupRule> {
    value
        .map(|v| {
            v.items()
                .into_iter()
                .filter_map(SecurityGroupRule::from_value)
                .collect()
        })
        .unwrap_or_default()
}

/// Logical id for a pointer value that names a resource in this document.
fn local_id(value: &PropertyValue, ids: &BTreeSet<String>) -> Option<String> {
    match value {
        PropertyValue::Reference { target, .. } => Some(target.clone()),
        PropertyValue::String(s) if ids.contains(s) => Some(s.clone()),
        _ => None,
    }
}

/// Endpoint id for an edge, adding an external placeholder node for literal ids.
fn endpoint(
    graph: &mut ResourceGraph,
    value: &PropertyValue,
    ids: &BTreeSet<String>,
) -> Option<String> {
    if let Some(id) = local_id(value, ids) {
        return Some(id);
    }
    match value {
        PropertyValue::String(s) if !s.trim().is_empty() => {
            graph.add_resource(Resource::external(s));
            Some(s.clone())
        }
        // Unresolved pointers stay as property evidence for the rules.
        _ => None,
    }
}

fn link(
    graph: &mut ResourceGraph,
    from: &str,
    value: &PropertyValue,
    relation: Relation,
    ids: &BTreeSet<String>,
) -> Result<()> {
    if let Some(to) = endpoint(graph, value, ids) {
        graph.add_edge(from, &to, relation)?;
    }
    Ok(())
}

fn derive_edges(
    graph: &mut ResourceGraph,
    r: &ResolvedResource,
    ids: &BTreeSet<String>,
) -> Result<()> {
    let props = &r.properties;

    match ResourceKind::from_type(&r.type_name) {
        ResourceKind::Function => {
            if let Some(role) = props.get("Role") {
                link(graph, &r.id, role, Relation::AttachedRole, ids)?;
            }
            if let Some(vpc) = props.get("VpcConfig") {
                if let Some(groups) = vpc.get("SecurityGroupIds") {
                    for sg in groups.items() {
                        link(graph, &r.id, sg, Relation::MemberOfSg, ids)?;
                    }
                }
                if let Some(subnets) = vpc.get("SubnetIds") {
                    for subnet in subnets.items() {
                        link(graph, &r.id, subnet, Relation::AssociatedSubnet, ids)?;
                    }
                }
            }
        }
        ResourceKind::Policy => {
            if let Some(roles) = props.get("Roles") {
                for role in roles.items() {
                    link(graph, &r.id, role, Relation::AttachedRole, ids)?;
                }
            }
        }
        ResourceKind::VpcEndpoint => {
            if let Some(tables) = props.get("RouteTableIds") {
                for table in tables.items() {
                    link(graph, &r.id, table, Relation::RoutedBy, ids)?;
                }
            }
        }
        ResourceKind::RouteTable => {
            if let Some(routes) = props.get("Routes") {
                for route in routes.items() {
                    if let Some(map) = route.as_map() {
                        link_route_target(graph, &r.id, map, ids)?;
                    }
                }
            }
        }
        _ => match r.type_name.as_str() {
            "AWS::EC2::SubnetRouteTableAssociation" => {
                let subnet = props.get("SubnetId").and_then(|v| endpoint(graph, v, ids));
                let table = props
                    .get("RouteTableId")
                    .and_then(|v| endpoint(graph, v, ids));
                if let (Some(subnet), Some(table)) = (subnet, table) {
                    graph.add_edge(&subnet, &table, Relation::RoutedBy)?;
                }
            }
            "AWS::EC2::Route" => {
                if let Some(table) = props
                    .get("RouteTableId")
                    .and_then(|v| endpoint(graph, v, ids))
                {
                    link_route_target(graph, &table, props, ids)?;
                }
            }
            _ => {}
        },
    }

    Ok(())
}

fn link_route_target(
    graph: &mut ResourceGraph,
    table: &str,
    route: &BTreeMap<String, PropertyValue>,
    ids: &BTreeSet<String>,
) -> Result<()> {
    let target = ROUTE_TARGET_KEYS.iter().find_map(|key| route.get(*key));
    match target {
        Some(PropertyValue::String(s)) if s == "local" => Ok(()),
        Some(value) => link(graph, table, value, Relation::TargetsGateway, ids),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::resource::RouteTarget;

    fn resolved(id: &str, type_name: &str, props: &[(&str, PropertyValue)]) -> ResolvedResource {
        ResolvedResource {
            id: id.to_string(),
            type_name: type_name.to_string(),
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn reference(target: &str) -> PropertyValue {
        PropertyValue::Reference {
            target: target.to_string(),
            attribute: None,
        }
    }

    fn map(pairs: &[(&str, PropertyValue)]) -> PropertyValue {
        PropertyValue::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_function_edges() {
        let graph = build(
            "t.yaml",
            vec![
                resolved(
                    "Fn",
                    "AWS::Lambda::Function",
                    &[
                        ("Role", reference("Role")),
                        (
                            "VpcConfig",
                            map(&[
                                (
                                    "SecurityGroupIds",
                                    PropertyValue::List(vec![reference("Sg"), "sg-ext".into()]),
                                ),
                                ("SubnetIds", PropertyValue::List(vec!["Subnet".into()])),
                            ]),
                        ),
                    ],
                ),
                resolved("Role", "AWS::IAM::Role", &[]),
                resolved("Sg", "AWS::EC2::SecurityGroup", &[]),
                resolved("Subnet", "AWS::EC2::Subnet", &[]),
            ],
        )
        .unwrap();

        assert_eq!(graph.targets("Fn", Relation::AttachedRole)[0].id, "Role");
        let groups = graph.targets("Fn", Relation::MemberOfSg);
        assert_eq!(groups.len(), 2);
        assert_eq!(graph.get("sg-ext").unwrap().kind, ResourceKind::External);
        assert_eq!(graph.targets("Fn", Relation::AssociatedSubnet)[0].id, "Subnet");
    }

    #[test]
    fn test_unresolved_role_yields_no_edge() {
        let graph = build(
            "t.yaml",
            vec![resolved(
                "Fn",
                "AWS::Lambda::Function",
                &[("Role", PropertyValue::Unresolved("Missing".into()))],
            )],
        )
        .unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.resource_count(), 1);
    }

    #[test]
    fn test_routes_fold_into_route_table() {
        let graph = build(
            "t.yaml",
            vec![
                resolved("Subnet", "AWS::EC2::Subnet", &[]),
                resolved("Table", "AWS::EC2::RouteTable", &[]),
                resolved("Igw", "AWS::EC2::InternetGateway", &[]),
                resolved(
                    "Assoc",
                    "AWS::EC2::SubnetRouteTableAssociation",
                    &[("SubnetId", reference("Subnet")), ("RouteTableId", reference("Table"))],
                ),
                resolved(
                    "DefaultRoute",
                    "AWS::EC2::Route",
                    &[
                        ("RouteTableId", reference("Table")),
                        ("DestinationCidrBlock", "0.0.0.0/0".into()),
                        ("GatewayId", reference("Igw")),
                    ],
                ),
            ],
        )
        .unwrap();

        assert_eq!(graph.targets("Subnet", Relation::RoutedBy)[0].id, "Table");
        assert_eq!(graph.targets("Table", Relation::TargetsGateway)[0].id, "Igw");
        let table = graph.get("Table").unwrap();
        assert_eq!(table.network.routes.len(), 1);
        assert_eq!(
            table.network.routes[0].target,
            RouteTarget::InternetGateway("Igw".into())
        );
    }

    #[test]
    fn test_standalone_egress_folds_into_group() {
        let graph = build(
            "t.yaml",
            vec![
                resolved("Sg", "AWS::EC2::SecurityGroup", &[]),
                resolved(
                    "OpenEgress",
                    "AWS::EC2::SecurityGroupEgress",
                    &[
                        ("GroupId", PropertyValue::Reference {
                            target: "Sg".into(),
                            attribute: Some("GroupId".into()),
                        }),
                        ("IpProtocol", "-1".into()),
                        ("CidrIp", "0.0.0.0/0".into()),
                    ],
                ),
            ],
        )
        .unwrap();
        let sg = graph.get("Sg").unwrap();
        assert_eq!(sg.network.egress.len(), 1);
        assert!(sg.network.egress[0].is_unrestricted_destination());
    }

    #[test]
    fn test_vpn_gateway_route_is_not_internet() {
        let graph = build(
            "t.yaml",
            vec![
                resolved("Table", "AWS::EC2::RouteTable", &[]),
                resolved("CorpVpn", "AWS::EC2::VPNGateway", &[]),
                resolved(
                    "CorpRoute",
                    "AWS::EC2::Route",
                    &[
                        ("RouteTableId", reference("Table")),
                        ("DestinationCidrBlock", "0.0.0.0/0".into()),
                        ("GatewayId", reference("CorpVpn")),
                    ],
                ),
            ],
        )
        .unwrap();

        let table = graph.get("Table").unwrap();
        assert_eq!(table.network.routes.len(), 1);
        assert_eq!(
            table.network.routes[0].target,
            RouteTarget::Other("CorpVpn".into())
        );
    }
}
