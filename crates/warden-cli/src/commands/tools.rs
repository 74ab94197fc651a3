use warden_tools::ToolRegistry;

pub fn run(name: Option<&str>) -> anyhow::Result<()> {
    let tools = ToolRegistry::with_builtins();

    match name {
        Some(name) => print_tool_detail(&tools, name)?,
        None => print_tool_list(&tools),
    }

    Ok(())
}

fn print_tool_list(tools: &ToolRegistry) {
    let mut names = tools.names();
    names.sort();

    println!("Built-in tools ({}):", names.len());
    for name in names {
        let description = tools
            .get(&name)
            .map(|tool| tool.description().to_string())
            .unwrap_or_else(|| "unknown tool".to_string());
        println!("{name} [{}] - {description}", policy_family(&name));
    }
}

fn print_tool_detail(tools: &ToolRegistry, name: &str) -> anyhow::Result<()> {
    let tool = tools
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("Unknown tool: {name}"))?;
    let schema = serde_json::to_string_pretty(&tool.parameters_schema())?;

    println!("name: {}", tool.name());
    println!("policy: {}", policy_family(tool.name()));
    println!("label: {}", tool.label());
    println!("description: {}", tool.description());
    println!("parameters:");
    println!("{schema}");

    Ok(())
}

/// Permission sub-policy that governs the tool.
fn policy_family(name: &str) -> &'static str {
    match name {
        "read_file" | "write_file" | "list_dir" => "filesystem",
        "http_request" => "http",
        "shell" => "shell",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::policy_family;

    #[test]
    fn test_policy_family_filesystem() {
        assert_eq!(policy_family("list_dir"), "filesystem");
    }

    #[test]
    fn test_policy_family_network() {
        assert_eq!(policy_family("http_request"), "http");
    }

    #[test]
    fn test_policy_family_unknown() {
        assert_eq!(policy_family("teleport"), "unknown");
    }
}
