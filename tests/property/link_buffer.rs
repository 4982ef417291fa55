use std::collections::VecDeque;

use proptest::prelude::*;

use procmux::pipeline::LinkBuffer;

#[derive(Debug, Clone)]
enum Op {
    Push(Vec<u8>),
    Consume(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..48).prop_map(Op::Push),
        (0usize..64).prop_map(Op::Consume),
    ]
}

proptest! {
    // Model the buffer as a bounded FIFO and check it never diverges.
    #[test]
    fn behaves_like_a_bounded_fifo(capacity in 1usize..128, ops in proptest::collection::vec(op(), 1..64)) {
        let mut link = LinkBuffer::with_capacity(capacity);
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(data) => {
                    let taken = link.push(&data);
                    prop_assert_eq!(taken, data.len().min(capacity - model.len()));
                    model.extend(&data[..taken]);
                }
                Op::Consume(n) => {
                    let n = n.min(link.used());
                    link.consume(n);
                    model.drain(..n);
                }
            }
            prop_assert_eq!(link.free() + link.used(), link.capacity());
            let expected = model.iter().copied().collect::<Vec<_>>();
            prop_assert_eq!(link.pending(), expected.as_slice());
        }
        prop_assert_eq!(link.bytes_in() - link.bytes_out(), link.used() as u64);
    }
}
