//! Fixed table mapping agent-side tool names onto application-side names
//! (spec.md §4.6). Unknown names pass through unchanged.

pub fn map_tool_name(agent_side: &str) -> String {
    match agent_side {
        "exec" | "execute" | "run" | "shell" | "bash" | "sh" => "run_shell".to_string(),
        "read" | "cat" => "read_file".to_string(),
        "write" | "write_file" | "save" => "write_file".to_string(),
        "edit" | "patch" => "edit_file".to_string(),
        "ls" | "list" | "list_dir" => "list_directory".to_string(),
        "grep" | "search" => "search_files".to_string(),
        other => other.to_string(),
    }
}
