//! Backpropagation data store
//!
//! Three ring buffers over a common time axis hold the per-timestep
//! operation values, the per-timestep per-weight derivatives and the
//! per-sequence-position average derivatives. Values are advanced shallowly
//! (overwritten anyway); derivatives and sequence averages are advanced
//! clean, so truncated steps contribute exact zeroes and every average
//! starts from zero.
//!
//! Derivative slots are weight-major: the cells of one weight form one
//! contiguous column, which lets the backward sweep hand every worker an
//! exclusive column while the rest of the buffer stays shared read-only.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::ring::{DataRingbuffer, RingPast};

/// Memory-bounded store for propagation values and derivatives
#[derive(Debug)]
pub struct BackpropDataStore {
    memory_slots: usize,
    weight_count: usize,
    op_count: usize,
    weight_relevant_count: usize,
    values: Option<DataRingbuffer<Vec<f64>>>,
    derivatives: Option<DataRingbuffer<Vec<f64>>>,
    sequence_derivatives: Option<DataRingbuffer<Vec<f64>>>,
    update_weight_derivative: bool,
}

impl BackpropDataStore {
    /// Create an unbuilt store for a network with the given memory reach
    /// and weight table size
    ///
    /// One slot more than the memory size is kept, because the spike
    /// function always observes the previous value.
    pub fn new(memory_size: u32, weight_count: usize) -> Self {
        Self {
            memory_slots: memory_size as usize + 1,
            weight_count,
            op_count: 0,
            weight_relevant_count: 0,
            values: None,
            derivatives: None,
            sequence_derivatives: None,
            update_weight_derivative: true,
        }
    }

    /// Construct (or reconstruct) the buffers
    ///
    /// `relevant_operation_count` is the number of leading operations whose
    /// derivatives feed the sequence averages; `sequence_size` sizes the
    /// average buffer.
    pub fn build(
        &mut self,
        number_of_operations: usize,
        relevant_operation_count: usize,
        sequence_size: usize,
    ) {
        let weight_count = self.weight_count;
        self.op_count = number_of_operations;
        self.weight_relevant_count = relevant_operation_count;
        self.values = Some(DataRingbuffer::new(self.memory_slots, || {
            vec![0.0; number_of_operations]
        }));
        self.derivatives = Some(DataRingbuffer::new(self.memory_slots, || {
            vec![0.0; weight_count * number_of_operations]
        }));
        self.sequence_derivatives = Some(DataRingbuffer::new(sequence_size.max(1), || {
            vec![0.0; weight_count]
        }));
        log::debug!(
            "backprop data store built: {} operations ({} weight relevant), {} weights, {} memory slots, {} sequence slots",
            number_of_operations,
            relevant_operation_count,
            weight_count,
            self.memory_slots,
            sequence_size
        );
    }

    /// Whether [`BackpropDataStore::build`] has run
    pub fn built(&self) -> bool {
        self.values.is_some()
    }

    /// Number of operations the store was built for
    pub fn operation_count(&self) -> usize {
        self.op_count
    }

    /// Number of leading operations feeding the sequence averages
    pub fn weight_relevant_operation_count(&self) -> usize {
        self.weight_relevant_count
    }

    /// Zero every buffer
    pub fn reset(&mut self) {
        if let Some(values) = &mut self.values {
            values.reset();
        }
        if let Some(derivatives) = &mut self.derivatives {
            derivatives.reset();
        }
        if let Some(sequence) = &mut self.sequence_derivatives {
            sequence.reset();
        }
    }

    /// Advance every buffer one time step forward
    ///
    /// Values step shallow (overwritten next), derivatives and sequence
    /// averages step clean so excluded steps read back as zero.
    pub fn step(&mut self) {
        debug_assert!(self.built());
        if let Some(values) = &mut self.values {
            values.shallow_step();
        }
        if let Some(derivatives) = &mut self.derivatives {
            derivatives.clean_step();
        }
        if let Some(sequence) = &mut self.sequence_derivatives {
            sequence.clean_step();
        }
    }

    /// Gate the sequence-average updates; disabled while the current step
    /// lies outside the truncation window
    pub fn set_weight_derivative_update(&mut self, update: bool) {
        self.update_weight_derivative = update;
    }

    /// Store the value of an operation for the current step
    pub fn set_value(&mut self, operation_index: usize, value: f64) {
        debug_assert!(operation_index < self.op_count);
        if let Some(values) = &mut self.values {
            values.current_mut()[operation_index] = value;
        }
    }

    /// Read an operation value `past_index` steps back; out-of-memory
    /// distances read as zero
    pub fn get_value(&self, past_index: u32, operation_index: usize) -> f64 {
        debug_assert!(operation_index < self.op_count);
        self.values
            .as_ref()
            .and_then(|values| values.get(past_index as usize))
            .map_or(0.0, |slot| slot[operation_index])
    }

    /// Store a derivative cell for the current step, feeding the sequence
    /// average when the operation is weight relevant and the gate is open
    pub fn set_derivative(&mut self, operation_index: usize, d_w_index: usize, value: f64) {
        debug_assert!(operation_index < self.op_count);
        debug_assert!(d_w_index < self.weight_count);
        let op_count = self.op_count;
        if let Some(derivatives) = &mut self.derivatives {
            derivatives.current_mut()[d_w_index * op_count + operation_index] = value;
        }
        if self.update_weight_derivative && operation_index < self.weight_relevant_count {
            // the leading operations are the objectives for the outputs,
            // only those carry the training signal out of the graph
            if let Some(sequence) = &mut self.sequence_derivatives {
                let stored = &mut sequence.current_mut()[d_w_index];
                *stored = (*stored + value) / 2.0;
            }
        }
    }

    /// Read a derivative cell `past_index` steps back; out-of-memory
    /// distances read as zero
    pub fn get_derivative(
        &self,
        past_index: u32,
        operation_index: usize,
        d_w_index: usize,
    ) -> f64 {
        debug_assert!(operation_index < self.op_count);
        debug_assert!(d_w_index < self.weight_count);
        self.derivatives
            .as_ref()
            .and_then(|derivatives| derivatives.get(past_index as usize))
            .map_or(0.0, |slot| slot[d_w_index * self.op_count + operation_index])
    }

    /// Read an averaged sequence derivative `past_sequence_index` labelled
    /// steps back
    pub fn get_average_derivative(&self, past_sequence_index: u32, d_w_index: usize) -> f64 {
        debug_assert!(d_w_index < self.weight_count);
        self.sequence_derivatives
            .as_ref()
            .and_then(|sequence| sequence.get(past_sequence_index as usize))
            .map_or(0.0, |slot| slot[d_w_index])
    }

    /// Run one backward sweep callback per weight index
    ///
    /// Every callback owns the current-step derivative column and sequence
    /// average cell of its weight exclusively; past derivative slots and the
    /// whole value buffer are shared read-only. Workers therefore write
    /// disjoint cells and the sweep needs no further synchronisation.
    pub fn sweep_weights<F>(&mut self, sweep: F)
    where
        F: Fn(WeightColumn<'_>, &ValueView<'_>) + Send + Sync,
    {
        debug_assert!(self.built());
        let (Some(values), Some(derivatives), Some(sequence)) = (
            self.values.as_ref(),
            self.derivatives.as_mut(),
            self.sequence_derivatives.as_mut(),
        ) else {
            return;
        };
        let op_count = self.op_count;
        let weight_relevant_count = self.weight_relevant_count;
        let update_sequence = self.update_weight_derivative;
        let value_view = ValueView { ring: values };
        let (current, past) = derivatives.split_current_mut();
        let (sequence_current, _) = sequence.split_current_mut();

        let run = |(weight_index, (column, sequence_cell)): (usize, (&mut [f64], &mut f64))| {
            sweep(
                WeightColumn {
                    weight_index,
                    op_count,
                    weight_relevant_count,
                    update_sequence,
                    column,
                    sequence_cell,
                    past,
                },
                &value_view,
            );
        };

        #[cfg(feature = "parallel")]
        current
            .par_chunks_mut(op_count)
            .zip(sequence_current.par_iter_mut())
            .enumerate()
            .for_each(run);

        #[cfg(not(feature = "parallel"))]
        current
            .chunks_mut(op_count)
            .zip(sequence_current.iter_mut())
            .enumerate()
            .for_each(run);
    }
}

/// Read-only view of the operation value buffer
#[derive(Debug, Clone, Copy)]
pub struct ValueView<'a> {
    ring: &'a DataRingbuffer<Vec<f64>>,
}

impl ValueView<'_> {
    /// Read an operation value `past_index` steps back; zero out of memory
    pub fn get(&self, past_index: u32, operation_index: usize) -> f64 {
        self.ring
            .get(past_index as usize)
            .map_or(0.0, |slot| slot[operation_index])
    }
}

/// Exclusive derivative column of one weight for the current time step
#[derive(Debug)]
pub struct WeightColumn<'a> {
    weight_index: usize,
    op_count: usize,
    weight_relevant_count: usize,
    update_sequence: bool,
    column: &'a mut [f64],
    sequence_cell: &'a mut f64,
    past: RingPast<'a, Vec<f64>>,
}

impl WeightColumn<'_> {
    /// The weight this column belongs to
    pub fn weight_index(&self) -> usize {
        self.weight_index
    }

    /// Read a derivative of this weight `past_index` steps back
    pub fn derivative(&self, past_index: u32, operation_index: usize) -> f64 {
        debug_assert!(operation_index < self.op_count);
        if past_index == 0 {
            self.column[operation_index]
        } else {
            self.past
                .get(past_index as usize)
                .map_or(0.0, |slot| slot[self.weight_index * self.op_count + operation_index])
        }
    }

    /// Store a derivative of this weight for the current step, feeding the
    /// sequence average like [`BackpropDataStore::set_derivative`]
    pub fn set_derivative(&mut self, operation_index: usize, value: f64) {
        debug_assert!(operation_index < self.op_count);
        self.column[operation_index] = value;
        if self.update_sequence && operation_index < self.weight_relevant_count {
            *self.sequence_cell = (*self.sequence_cell + value) / 2.0;
        }
    }
}
