// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in demo graphs.

use crate::nodes::Print;
use ordoplay_blueprint::library::LibraryError;
use ordoplay_blueprint::nodes::{BlackboardValue, Constant, Iterate, Pipe, Root, Subgraph};
use ordoplay_blueprint::{Blackboard, DataType, GraphAssetId, GraphLibrary, SubgraphTree};

/// A main graph running one "For Each" sub-graph twice with different items
/// and labels.
pub struct Demo {
    /// All graphs
    pub library: GraphLibrary,
    /// Host instances and their overrides
    pub tree: SubgraphTree,
    /// Top-level graph
    pub main: GraphAssetId,
}

impl Demo {
    /// Build the demo
    pub fn build() -> Result<Self, LibraryError> {
        let mut library = GraphLibrary::new();
        let for_each = Self::for_each(&mut library)?;

        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).ok_or(LibraryError::UnknownGraph(main))?;
        let root = meta.add_node(Root::new().with_enter("Run").with_exit("Done"))?;
        let pipe = meta.add_node(Pipe::new(2))?;
        let numbers = meta.add_node(Constant::new(vec![1, 2, 3]))?;
        let words = meta.add_node(Constant::new(vec!["red", "green"]))?;
        let first = meta.add_node(Subgraph::default())?;
        let second = meta.add_node(Subgraph::default())?;
        let print_number = meta.add_node(Print)?;
        let print_word = meta.add_node(Print)?;
        library.assign_subgraph(main, first, Some(for_each))?;
        library.assign_subgraph(main, second, Some(for_each))?;

        // Host ports: Run, Each, Done, Items, Item
        let meta = library.graph_mut(main).ok_or(LibraryError::UnknownGraph(main))?;
        meta.connect(root, 0, pipe, Pipe::IN)?;
        meta.connect(pipe, Pipe::exit(0), first, 0)?;
        meta.connect(pipe, Pipe::exit(1), second, 0)?;
        meta.connect(numbers, Constant::OUT, first, 3)?;
        meta.connect(words, Constant::OUT, second, 3)?;
        meta.connect(first, 1, print_number, Print::IN)?;
        meta.connect(first, 4, print_number, Print::MESSAGE)?;
        meta.connect(second, 1, print_word, Print::IN)?;
        meta.connect(second, 4, print_word, Print::MESSAGE)?;
        meta.connect(second, 2, root, 1)?;

        let mut tree = SubgraphTree::new();
        tree.sync(&library, main);
        for (host, label) in [(first, "numbers"), (second, "words")] {
            if let Some(entry) = tree.find(host, None) {
                tree.set_overrides(entry, Some(Blackboard::new().with("Label", label)));
            }
        }

        Ok(Self {
            library,
            tree,
            main,
        })
    }

    fn for_each(library: &mut GraphLibrary) -> Result<GraphAssetId, LibraryError> {
        let graph = library.create_graph("For Each");
        let meta = library.graph_mut(graph).ok_or(LibraryError::UnknownGraph(graph))?;
        meta.blackboard_mut().set("Label", "items");

        let root = meta.add_node(
            Root::new()
                .with_enter("Run")
                .with_exit("Each")
                .with_exit("Done")
                .with_input("Items", DataType::array_of(DataType::Any))
                .with_output("Item", DataType::Any),
        )?;
        let label = meta.add_node(BlackboardValue::new("Label", DataType::String))?;
        let announce = meta.add_node(Print)?;
        let iterate = meta.add_node(Iterate::default())?;

        meta.connect(root, 0, announce, Print::IN)?;
        meta.connect(label, BlackboardValue::OUT, announce, Print::MESSAGE)?;
        meta.connect(announce, Print::OUT, iterate, Iterate::START)?;
        meta.connect(root, 3, iterate, Iterate::ELEMENTS)?;
        meta.connect(iterate, Iterate::ON_ITERATION, root, 1)?;
        meta.connect(iterate, Iterate::ELEMENT, root, 4)?;
        meta.connect(iterate, Iterate::ON_FINISH, root, 2)?;
        Ok(graph)
    }
}
