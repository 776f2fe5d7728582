/// A state that advances purely from its current value, an input and a
/// mutable context. Implementations perform no I/O.
pub trait FiniteStateMachine {
    type Input;
    type Context;

    #[must_use]
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self;
}
