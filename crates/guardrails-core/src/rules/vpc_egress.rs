use super::{Rule, ScanContext};
use crate::error::RuleError;
use crate::graph::resource::{Resource, ResourceKind, RouteTarget};
use crate::graph::{Relation, ResourceGraph};
use crate::report::{Evidence, Finding, Severity};

pub const RULE_NAME: &str = "vpc_egress";

/// Flags open security-group egress and functions with a route to the internet.
pub struct VpcEgressRule;

impl Rule for VpcEgressRule {
    fn name(&self) -> &'static str {
        RULE_NAME
    }

    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Finding>, RuleError> {
        let graph = ctx.graph;
        let mut findings: Vec<Finding> = graph
            .resources_of_kind(ResourceKind::SecurityGroup)
            .into_iter()
            .filter_map(open_egress_rule)
            .collect();

        let has_endpoints = !graph
            .resources_of_kind(ResourceKind::VpcEndpoint)
            .is_empty();
        for function in graph.resources_of_kind(ResourceKind::Function) {
            if function.property("VpcConfig").is_some() {
                findings.extend(function_paths(graph, function, has_endpoints));
            }
        }

        Ok(findings)
    }
}

/// Explicit egress to `0.0.0.0/0` or `::/0` on all protocols.
fn open_egress_rule(group: &Resource) -> Option<Finding> {
    let cidrs: Vec<&str> = group
        .network
        .egress
        .iter()
        .filter(|r| r.is_unrestricted_destination() && r.is_all_protocols())
        .map(|r| r.cidr.as_str())
        .collect();
    if cidrs.is_empty() {
        return None;
    }
    Some(
        Finding::new(
            RULE_NAME,
            Severity::High,
            &group.id,
            "open-egress",
            format!(
                "Security group '{}' allows all outbound traffic to {}",
                group.id,
                cidrs.join(", ")
            ),
            "Restrict SecurityGroupEgress to the ports and destinations the function needs, \
             or to VPC endpoint prefix lists.",
        )
        .with_evidence(Evidence {
            key: Some(cidrs.join(",")),
            detector: Some("security-group-egress".to_string()),
            ..Evidence::default()
        }),
    )
}

/// Whether a group lets traffic leave for any destination. A template group
/// with no egress rules keeps the provider's allow-all default.
fn permits_unrestricted_egress(group: &Resource) -> bool {
    match group.kind {
        ResourceKind::SecurityGroup => {
            if group.network.egress.is_empty() {
                group.property("SecurityGroupEgress").is_none()
            } else {
                group
                    .network
                    .egress
                    .iter()
                    .any(|r| r.is_unrestricted_destination())
            }
        }
        _ => false,
    }
}

#[derive(Default)]
struct DefaultRoutes {
    internet: Vec<String>,
    nat: Vec<String>,
}

fn default_routes(graph: &ResourceGraph, subnets: &[&Resource]) -> DefaultRoutes {
    let mut routes = DefaultRoutes::default();
    for subnet in subnets {
        for table in graph.targets(&subnet.id, Relation::RoutedBy) {
            for route in table.network.routes.iter().filter(|r| r.is_default_route()) {
                match &route.target {
                    RouteTarget::InternetGateway(gw) => {
                        routes
                            .internet
                            .push(format!("{} -> {} -> {}", subnet.id, table.id, gw));
                    }
                    RouteTarget::NatGateway(nat) => {
                        routes
                            .nat
                            .push(format!("{} -> {} -> {}", subnet.id, table.id, nat));
                    }
                    _ => {}
                }
            }
        }
    }
    routes
}

fn function_paths(graph: &ResourceGraph, function: &Resource, has_endpoints: bool) -> Vec<Finding> {
    let mut findings = Vec::new();
    let groups = graph.targets(&function.id, Relation::MemberOfSg);
    let subnets = graph.targets(&function.id, Relation::AssociatedSubnet);

    let declares_groups = function
        .property_path(&["VpcConfig", "SecurityGroupIds"])
        .is_some_and(|v| !v.is_empty());
    if !declares_groups {
        findings.push(Finding::new(
            RULE_NAME,
            Severity::Medium,
            &function.id,
            "no-security-groups",
            format!(
                "Function '{}' is attached to a VPC without security groups",
                function.id
            ),
            "Attach a dedicated security group with explicit, minimal egress rules.",
        ));
    }

    let open_groups: Vec<&str> = groups
        .iter()
        .filter(|g| permits_unrestricted_egress(g))
        .map(|g| g.id.as_str())
        .collect();
    let routes = default_routes(graph, &subnets);

    if !open_groups.is_empty() && !routes.internet.is_empty() {
        findings.push(
            Finding::new(
                RULE_NAME,
                Severity::High,
                &function.id,
                "internet-egress",
                format!(
                    "Function '{}' has network-reachable egress: security group {} permits unrestricted egress and {} routes to an internet gateway",
                    function.id,
                    open_groups.join(", "),
                    routes.internet.join("; ")
                ),
                "Place the function in private subnets, route through a NAT gateway or VPC endpoints, \
                 and restrict security-group egress.",
            )
            .with_evidence(Evidence {
                key: Some(routes.internet.join("; ")),
                detector: Some("internet-gateway-route".to_string()),
                ..Evidence::default()
            }),
        );
    } else if !open_groups.is_empty() && !routes.nat.is_empty() {
        findings.push(
            Finding::new(
                RULE_NAME,
                Severity::Medium,
                &function.id,
                "nat-egress",
                format!(
                    "Function '{}' can reach the internet through a NAT gateway with unrestricted egress from {}",
                    function.id,
                    open_groups.join(", ")
                ),
                "Limit security-group egress to required destinations or use VPC endpoints for AWS services.",
            )
            .with_evidence(Evidence {
                key: Some(routes.nat.join("; ")),
                detector: Some("nat-gateway-route".to_string()),
                ..Evidence::default()
            }),
        );
    }

    if !subnets.is_empty() && !has_endpoints {
        findings.push(Finding::new(
            RULE_NAME,
            Severity::Info,
            &function.id,
            "no-vpc-endpoints",
            format!(
                "Function '{}' runs in subnets with no VPC endpoints defined in this template",
                function.id
            ),
            "Add gateway or interface VPC endpoints so AWS API traffic stays inside the VPC.",
        ));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::source::SourceIndex;
    use crate::template::parse_template;

    fn run(yaml: &str) -> Vec<Finding> {
        let graph = parse_template(yaml, "t.yaml".into()).unwrap();
        let sources = SourceIndex::default();
        let config = ScanConfig::default();
        let ctx = ScanContext {
            graph: &graph,
            sources: &sources,
            config: &config,
        };
        VpcEgressRule.evaluate(&ctx).unwrap()
    }

    const NETWORK: &str = r#"
  Subnet:
    Type: AWS::EC2::Subnet
  Table:
    Type: AWS::EC2::RouteTable
  Assoc:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref Subnet
      RouteTableId: !Ref Table
  Igw:
    Type: AWS::EC2::InternetGateway
  DefaultRoute:
    Type: AWS::EC2::Route
    Properties:
      RouteTableId: !Ref Table
      DestinationCidrBlock: 0.0.0.0/0
      GatewayId: !Ref Igw
"#;

    #[test]
    fn test_open_egress_without_routes_is_high() {
        let findings = run(r#"
Resources:
  Sg:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: open
      SecurityGroupEgress:
        - IpProtocol: "-1"
          CidrIp: 0.0.0.0/0
"#);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "vpc_egress::Sg::open-egress");
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_restricted_egress_is_clean() {
        let findings = run(r#"
Resources:
  Sg:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: https only
      SecurityGroupEgress:
        - IpProtocol: tcp
          FromPort: 443
          ToPort: 443
          CidrIp: 10.0.0.0/16
"#);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_function_with_internet_route_and_open_group() {
        let yaml = format!(
            r#"
Resources:
  Fn:
    Type: AWS::Lambda::Function
    Properties:
      VpcConfig:
        SecurityGroupIds: [!Ref Sg]
        SubnetIds: [!Ref Subnet]
  Sg:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: https out
      SecurityGroupEgress:
        - IpProtocol: tcp
          FromPort: 443
          ToPort: 443
          CidrIp: 0.0.0.0/0
{}"#,
            NETWORK
        );
        let findings = run(&yaml);
        let ids: Vec<&str> = findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "vpc_egress::Fn::internet-egress",
                "vpc_egress::Fn::no-vpc-endpoints"
            ]
        );
        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings[0].message.contains("Subnet -> Table -> Igw"));
    }

    #[test]
    fn test_function_without_groups_is_medium() {
        let findings = run(r#"
Resources:
  Fn:
    Type: AWS::Lambda::Function
    Properties:
      VpcConfig:
        SubnetIds: [subnet-0abc]
  Endpoint:
    Type: AWS::EC2::VPCEndpoint
"#);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "vpc_egress::Fn::no-security-groups");
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_nat_route_with_default_group_is_medium() {
        let findings = run(r#"
Resources:
  Fn:
    Type: AWS::Serverless::Function
    Properties:
      VpcConfig:
        SecurityGroupIds: [!GetAtt Sg.GroupId]
        SubnetIds: [!Ref Private]
  Sg:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: default egress
  Private:
    Type: AWS::EC2::Subnet
  PrivateTable:
    Type: AWS::EC2::RouteTable
  Assoc:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref Private
      RouteTableId: !Ref PrivateTable
  Nat:
    Type: AWS::EC2::NatGateway
  NatRoute:
    Type: AWS::EC2::Route
    Properties:
      RouteTableId: !Ref PrivateTable
      DestinationCidrBlock: 0.0.0.0/0
      NatGatewayId: !Ref Nat
  S3Endpoint:
    Type: AWS::EC2::VPCEndpoint
    Properties:
      RouteTableIds: [!Ref PrivateTable]
"#);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "vpc_egress::Fn::nat-egress");
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_functions_outside_vpc_are_ignored() {
        let findings = run(r#"
Resources:
  Fn:
    Type: AWS::Serverless::Function
    Properties:
      Handler: app.handler
"#);
        assert!(findings.is_empty());
    }
}
