use taskq::output::{format_human, HumanOutput};

#[test]
fn format_human_includes_sections() {
    let mut human = HumanOutput::new("taskq run: 2 actions, 1 tasks");
    human.push_summary("remote calls", "2");
    human.push_detail("#0 @0ms 1-toggle: queued -> rolled_back");
    human.push_warning("Could not toggle task 1: Remote unavailable: offline");
    human.push_next_step("taskq run scenario.toml --reentry ignore");

    let rendered = format_human(&human);
    assert!(rendered.contains("taskq run: 2 actions, 1 tasks"));
    assert!(rendered.contains("Summary:"));
    assert!(rendered.contains("- remote calls: 2"));
    assert!(rendered.contains("Details:"));
    assert!(rendered.contains("- #0 @0ms 1-toggle: queued -> rolled_back"));
    assert!(rendered.contains("Warnings:"));
    assert!(rendered.contains("- Could not toggle task 1"));
    assert!(rendered.contains("Next steps:"));
}

#[test]
fn format_human_omits_empty_sections() {
    let human = HumanOutput::new("taskq config");
    let rendered = format_human(&human);
    assert_eq!(rendered, "taskq config");
}
