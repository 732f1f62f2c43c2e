use oxid::config::parser::parse_config;

#[test]
fn test_parse_valid_config() {
    let yaml = r#"
project:
  name: "test-project"
  version: "1.0"
  settings:
    terraform_binary: "terraform"
    parallelism: 5
    working_dir: ".oxid"
  variables:
    region: "us-east-1"
  modules:
    vpc:
      source: "terraform-aws-modules/vpc/aws"
      version: "5.0.0"
      variables:
        cidr: "10.0.0.0/16"
      outputs:
        - vpc_id
    sg:
      source: "./modules/sg"
      depends_on:
        - vpc
      variables:
        vpc_id: "${module.vpc.vpc_id}"
      outputs:
        - sg_id
"#;

    let config = parse_config(yaml).expect("Should parse valid config");
    assert_eq!(config.project.name, "test-project");
    assert_eq!(config.project.modules.len(), 2);
    assert!(config.project.modules.contains_key("vpc"));
    assert!(config.project.modules.contains_key("sg"));
    assert_eq!(config.project.settings.parallelism, 5);
}

#[test]
fn test_parse_minimal_config() {
    let yaml = r#"
project:
  name: "minimal"
  version: "0.1"
  modules:
    single:
      source: "hashicorp/null"
"#;

    let config = parse_config(yaml).expect("Should parse minimal config");
    assert_eq!(config.project.name, "minimal");
    assert_eq!(config.project.modules.len(), 1);
    // Defaults should be applied
    assert_eq!(config.project.settings.terraform_binary, "terraform");
    assert_eq!(config.project.settings.parallelism, 10);
    assert_eq!(config.project.settings.working_dir, ".oxid");
}

#[test]
fn test_parse_invalid_yaml() {
    let yaml = "not: valid: yaml: [";
    let result = parse_config(yaml);
    assert!(result.is_err());
}

#[test]
fn test_parse_config_with_hooks() {
    let yaml = r#"
project:
  name: "with-hooks"
  version: "1.0"
  modules:
    vpc:
      source: "./vpc"
  hooks:
    pre_plan:
      - "echo start"
    post_apply:
      - "echo done"
    on_failure:
      - "echo failed"
"#;

    let config = parse_config(yaml).unwrap();
    let hooks = config.project.hooks.unwrap();
    assert_eq!(hooks.pre_plan.len(), 1);
    assert_eq!(hooks.post_apply.len(), 1);
    assert_eq!(hooks.on_failure.len(), 1);
}

#[test]
fn test_parse_module_with_array_variables() {
    let yaml = r#"
project:
  name: "arrays"
  version: "1.0"
  modules:
    vpc:
      source: "./vpc"
      variables:
        azs: ["us-east-1a", "us-east-1b"]
        subnets: ["10.0.1.0/24", "10.0.2.0/24"]
      outputs:
        - vpc_id
"#;

    let config = parse_config(yaml).unwrap();
    let vpc = &config.project.modules["vpc"];
    let azs = vpc.variables.get("azs").unwrap();
    assert!(azs.is_sequence());
}
