//! Assemble-and-walk tests over whole method bodies.

use prism_bytecode::{CodeBuilder, IfCond, InvokeKind, Opcode, PayloadKind};

#[test]
fn test_walk_steps_over_every_payload() {
    let mut b = CodeBuilder::new(3);
    let (a, c) = (b.create_label(), b.create_label());
    b.packed_switch(0, 0, &[a, c]);
    b.fill_array_data(1, 4, &[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
    b.bind_label(a);
    b.invoke(InvokeKind::Virtual, 7, &[1]);
    b.bind_label(c);
    b.return_void();
    let code = b.finish().expect("assembly failed");

    let walked: Vec<_> = code
        .instructions()
        .map(|r| r.expect("decode failed"))
        .collect();
    let opcodes: Vec<_> = walked
        .iter()
        .filter(|(_, inst)| inst.payload_kind().is_none())
        .map(|(_, inst)| inst.opcode())
        .collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::PackedSwitch,
            Opcode::FillArrayData,
            Opcode::InvokeVirtual,
            Opcode::ReturnVoid
        ]
    );

    let payloads: Vec<_> = walked
        .iter()
        .filter_map(|(_, inst)| inst.payload_kind())
        .collect();
    assert_eq!(payloads, vec![PayloadKind::PackedSwitch, PayloadKind::FillArrayData]);

    let end: usize = walked.iter().map(|(_, i)| i.size_in_code_units()).sum();
    assert_eq!(end, code.insns().len());
}

#[test]
fn test_switch_targets_resolve_to_bound_labels() {
    let mut b = CodeBuilder::new(1);
    let cases: Vec<_> = (0..3).map(|_| b.create_label()).collect();
    b.sparse_switch(0, &[(100, cases[2]), (-5, cases[0]), (7, cases[1])]);
    for &case in &cases {
        b.bind_label(case);
        b.nop();
    }
    b.return_void();
    let code = b.finish().expect("assembly failed");

    let switch = code.instruction_at(0).expect("decode failed");
    let payload = code.switch_payload(0, &switch).expect("payload");
    assert_eq!(payload.keys.as_slice(), &[-5, 7, 100]);
    assert_eq!(payload.targets.as_slice(), &[3, 4, 5]);
}

#[test]
fn test_loop_with_backedge_and_exit() {
    let mut b = CodeBuilder::new(2);
    let (head, exit) = (b.create_label(), b.create_label());
    b.const4(0, 3);
    b.bind_label(head);
    b.if_testz(IfCond::Le, 0, exit);
    b.add_int_lit8(0, 0, -1);
    b.goto(head);
    b.bind_label(exit);
    b.return_value(0);
    let code = b.finish().expect("assembly failed");

    let back = code.instruction_at(5).expect("decode failed");
    assert_eq!(back.opcode(), Opcode::Goto);
    assert_eq!(back.target_offset(), Some(-4));
    let cond = code.instruction_at(1).expect("decode failed");
    assert_eq!(cond.target_offset(), Some(5));
}
