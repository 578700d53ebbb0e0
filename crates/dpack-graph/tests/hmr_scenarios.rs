//! Graph-level HMR scenarios as the import rewriter would build them.

use dpack_graph::{HmrOutcome, ModuleGraph, ModuleId, ResolvedUrl, UpdateKind, plan_updates};

fn ensure(graph: &mut ModuleGraph, url: &str) -> ModuleId {
    graph.ensure_entry(
        &ResolvedUrl {
            url: url.to_string(),
            id: format!("/project{url}"),
            meta: None,
        },
        true,
    )
}

#[test]
fn test_editing_imported_stylesheet_sends_css_update() {
    let mut graph = ModuleGraph::new();
    let main = ensure(&mut graph, "/src/main.js");
    let app = ensure(&mut graph, "/src/App.js");
    let style = ensure(&mut graph, "/src/style.css");

    graph.update_module_info(main, &[app], None, &[], None, false);
    graph.update_module_info(app, &[style], None, &[], None, true);
    // the css wrapper module accepts itself
    graph.update_module_info(style, &[], None, &[], None, true);

    let modules = graph.modules_by_file("/project/src/style.css");
    match plan_updates(&mut graph, &modules, 1_700_000_000_000) {
        HmrOutcome::Update(updates) => {
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].kind, UpdateKind::Css);
            assert_eq!(updates[0].path, "/src/style.css");
        }
        other => panic!("expected css update, got {other:?}"),
    }
}

#[test]
fn test_editing_module_without_importers_reloads() {
    let mut graph = ModuleGraph::new();
    let lone = ensure(&mut graph, "/src/lone.js");
    graph.update_module_info(lone, &[], None, &[], None, false);

    let modules = graph.modules_by_file("/project/src/lone.js");
    assert_eq!(plan_updates(&mut graph, &modules, 1), HmrOutcome::FullReload);
}

#[test]
fn test_update_bubbles_to_self_accepting_ancestor() {
    let mut graph = ModuleGraph::new();
    let main = ensure(&mut graph, "/src/main.js");
    let view = ensure(&mut graph, "/src/view.js");
    let util = ensure(&mut graph, "/src/util.js");
    graph.update_module_info(main, &[view], None, &[], None, false);
    graph.update_module_info(view, &[util], None, &[], None, true);
    graph.update_module_info(util, &[], None, &[], None, false);

    match plan_updates(&mut graph, &[util], 7) {
        HmrOutcome::Update(updates) => {
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].path, "/src/view.js");
            assert_eq!(updates[0].accepted_path, "/src/view.js");
        }
        other => panic!("expected update, got {other:?}"),
    }

    // the changed module and the walk up to the boundary were invalidated
    assert_eq!(graph.node(util).unwrap().last_hmr_timestamp, 7);
    assert_eq!(graph.node(view).unwrap().last_hmr_timestamp, 7);
}
